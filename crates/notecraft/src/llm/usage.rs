//! Correlation IDs and usage tracking for pipeline runs.
//!
//! Each pipeline run gets a `trace_id` that prefixes its log lines. Every
//! generation call produces a [`GenerationStats`]; the [`UsageTracker`]
//! accumulates them for the run summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Generate a unique trace ID for a pipeline run.
pub fn generate_trace_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates calls within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tr-{ts:x}-{count:04x}")
}

/// Measurements for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub elapsed: Duration,
}

impl GenerationStats {
    /// Generated tokens per second of wall time.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.completion_tokens as f64 / secs
        } else {
            0.0
        }
    }

    pub fn to_log_string(&self) -> String {
        format!(
            "{} prompt + {} generated tokens in {:.1}s ({:.1} tok/s)",
            self.prompt_tokens,
            self.completion_tokens,
            self.elapsed.as_secs_f64(),
            self.tokens_per_second(),
        )
    }
}

/// Cumulative usage for a pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTracker {
    pub calls: u32,
    pub failed_calls: u32,
    pub truncated_calls: u32,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_elapsed: Duration,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call that returned a completion.
    pub fn record(&mut self, stats: &GenerationStats, truncated: bool) {
        self.calls += 1;
        if truncated {
            self.truncated_calls += 1;
        }
        self.total_prompt_tokens += stats.prompt_tokens as u64;
        self.total_completion_tokens += stats.completion_tokens as u64;
        self.total_elapsed += stats.elapsed;
    }

    /// Record a call that failed outright.
    pub fn record_failure(&mut self, elapsed: Duration) {
        self.calls += 1;
        self.failed_calls += 1;
        self.total_elapsed += elapsed;
    }

    /// Total tokens consumed.
    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    /// Format as a short summary string.
    pub fn summary(&self) -> String {
        format!(
            "{} LLM call(s) ({} failed, {} truncated), tokens: {} prompt + {} generated = {} total, {:.1}s",
            self.calls,
            self.failed_calls,
            self.truncated_calls,
            self.total_prompt_tokens,
            self.total_completion_tokens,
            self.total_tokens(),
            self.total_elapsed.as_secs_f64(),
        )
    }
}
