//! Retry policy for model-server calls.
//!
//! A local llama.cpp server answers 503 while it loads weights, and OpenRouter
//! rate-limits with 429. Both clear up on their own, so the clients wait and
//! try again with a doubling pause. Anything else is returned at once.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::LlmError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first call. Zero disables retrying.
    pub max_retries: u32,
    /// Pause before the first retry. Each later pause doubles.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self::with_retries(0)
    }

    /// Pause before retry number `retry` (1-based).
    pub fn pause_before(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// 429 and the 5xx gateway family.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Run `call`, retrying transient [`LlmError`]s up to `config.max_retries` times.
///
/// `label` only feeds the log line.
pub async fn retry_call<T, F, Fut>(config: &RetryConfig, label: &str, mut call: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut retry = 0;
    loop {
        match call().await {
            Err(e) if e.is_transient() && retry < config.max_retries => {
                retry += 1;
                let pause = config.pause_before(retry);
                warn!(
                    "{label}: {e}; retry {retry}/{} in {} ms",
                    config.max_retries,
                    pause.as_millis()
                );
                tokio::time::sleep(pause).await;
            }
            result => return result,
        }
    }
}
