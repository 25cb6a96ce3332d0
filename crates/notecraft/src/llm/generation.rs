//! Generation as a small state machine.
//!
//! A [`GenerationTask`] starts `Pending` and ends in exactly one terminal
//! state: `Complete` (natural stop), `Truncated` (output budget exhausted,
//! text kept) or `Failed` (no usable response). When continuations are
//! allowed, a truncated completion is resumed by re-sending the prompt with
//! the text generated so far appended, up to `max_continuations` times.
//!
//! A finish reason the backend reports that is neither a stop nor a length
//! cut-off (`content_filter`, for example) still ends the task as
//! `Complete`, but is logged and kept on the outcome as `unusual_finish`.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::usage::GenerationStats;
use super::{FinishReason, GenerationRequest, TextGenerator};

/// Where a generation stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationState {
    Pending,
    /// The model stopped on its own. The text may be empty.
    Complete(String),
    /// The output budget ran out; the text is kept but likely incomplete.
    Truncated(String),
    /// The call failed; carries the reason.
    Failed(String),
}

impl GenerationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationState::Pending)
    }
}

/// Terminal result of a [`GenerationTask`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutcome {
    pub state: GenerationState,
    /// How many continuation calls were made after the first.
    pub continuations: u32,
    /// Stats for every backend call that returned a completion.
    pub stats: Vec<GenerationStats>,
    /// Wall time of the failing call, if the last call failed.
    pub failed_after: Option<Duration>,
    /// Finish reason of the last call when it was neither stop nor length.
    pub unusual_finish: Option<String>,
}

impl GenerationOutcome {
    /// Non-empty generated text, whether complete or truncated.
    pub fn text(&self) -> Option<&str> {
        match &self.state {
            GenerationState::Complete(t) | GenerationState::Truncated(t) if !t.is_empty() => {
                Some(t)
            }
            _ => None,
        }
    }

    pub fn is_truncated(&self) -> bool {
        matches!(self.state, GenerationState::Truncated(_))
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            GenerationState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// One generation, possibly spanning several backend calls.
pub struct GenerationTask<'a> {
    generator: &'a dyn TextGenerator,
    request: GenerationRequest,
    max_continuations: u32,
}

impl<'a> GenerationTask<'a> {
    pub fn new(generator: &'a dyn TextGenerator, request: GenerationRequest) -> Self {
        Self {
            generator,
            request,
            max_continuations: 0,
        }
    }

    /// Allow up to `n` continuation calls after a truncated completion.
    pub fn with_max_continuations(mut self, n: u32) -> Self {
        self.max_continuations = n;
        self
    }

    /// Drive the task to a terminal state. Never returns `Pending`.
    pub async fn run(self, label: &str) -> GenerationOutcome {
        let mut state = GenerationState::Pending;
        let mut accumulated = String::new();
        let mut continuations = 0;
        let mut stats = Vec::new();
        let mut failed_after = None;
        let mut unusual_finish = None;

        while !state.is_terminal() {
            let request = if accumulated.is_empty() {
                self.request.clone()
            } else {
                GenerationRequest {
                    prompt: format!("{}{}", self.request.prompt, accumulated),
                    ..self.request.clone()
                }
            };

            trace!("{label}: prompt is {} bytes", request.prompt.len());
            let start = Instant::now();
            match self.generator.generate(&request).await {
                Err(e) => {
                    let elapsed = start.elapsed();
                    debug!("{label}: LLM call failed after {:.1}s: {e}", elapsed.as_secs_f64());
                    failed_after = Some(elapsed);
                    state = if accumulated.trim().is_empty() {
                        GenerationState::Failed(e.to_string())
                    } else {
                        // Earlier calls produced text; keep it as truncated.
                        GenerationState::Truncated(accumulated.trim().to_string())
                    };
                }
                Ok(generation) => {
                    let call_stats = GenerationStats {
                        prompt_tokens: generation.usage.prompt_tokens.unwrap_or(0),
                        completion_tokens: generation.usage.completion_tokens.unwrap_or(0),
                        elapsed: start.elapsed(),
                    };
                    debug!("{label}: {}", call_stats.to_log_string());
                    stats.push(call_stats);
                    accumulated.push_str(&generation.text);

                    state = match generation.finish_reason {
                        FinishReason::Length if continuations < self.max_continuations => {
                            continuations += 1;
                            debug!(
                                "{label}: output budget exhausted, continuing ({continuations}/{})",
                                self.max_continuations
                            );
                            GenerationState::Pending
                        }
                        FinishReason::Length => {
                            GenerationState::Truncated(accumulated.trim().to_string())
                        }
                        FinishReason::Stop => {
                            GenerationState::Complete(accumulated.trim().to_string())
                        }
                        FinishReason::Other(reason) => {
                            warn!("{label}: model stopped with unusual finish reason '{reason}'");
                            unusual_finish = Some(reason);
                            GenerationState::Complete(accumulated.trim().to_string())
                        }
                    };
                }
            }
        }

        GenerationOutcome {
            state,
            continuations,
            stats,
            failed_after,
            unusual_finish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::Generation;
    use crate::test_support::WordModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn natural_stop_completes() {
        let model = WordModel::new(|_| Ok(Generation::stop("  1. Intro\n")));
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .run("test")
            .await;
        assert_eq!(outcome.state, GenerationState::Complete("1. Intro".into()));
        assert_eq!(outcome.text(), Some("1. Intro"));
        assert_eq!(outcome.stats.len(), 1);
    }

    #[tokio::test]
    async fn unusual_finish_reason_is_kept_on_the_outcome() {
        let model = WordModel::new(|_| {
            Ok(Generation {
                finish_reason: FinishReason::Other("content_filter".into()),
                ..Generation::stop("partial text cut by fil")
            })
        });
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .run("test")
            .await;
        assert_eq!(
            outcome.state,
            GenerationState::Complete("partial text cut by fil".into())
        );
        assert_eq!(outcome.unusual_finish.as_deref(), Some("content_filter"));
    }

    #[tokio::test]
    async fn natural_stop_has_no_unusual_finish() {
        let model = WordModel::new(|_| Ok(Generation::stop("1. Intro")));
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .run("test")
            .await;
        assert!(outcome.unusual_finish.is_none());
    }

    #[tokio::test]
    async fn empty_completion_has_no_text() {
        let model = WordModel::new(|_| Ok(Generation::stop("   ")));
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .run("test")
            .await;
        assert_eq!(outcome.state, GenerationState::Complete(String::new()));
        assert!(outcome.text().is_none());
    }

    #[tokio::test]
    async fn length_without_continuations_is_truncated() {
        let model = WordModel::new(|_| Ok(Generation::length("1. Intro\n2. Meth")));
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .run("test")
            .await;
        assert!(outcome.is_truncated());
        assert_eq!(outcome.text(), Some("1. Intro\n2. Meth"));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn continuation_resumes_from_generated_text() {
        let calls = AtomicUsize::new(0);
        let model = WordModel::new(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Generation::length("1. Intro\n2. Meth"))
            } else {
                Ok(Generation::stop("ods\n3. Results"))
            }
        });
        let outcome = GenerationTask::new(&model, GenerationRequest::new("PROMPT:", 16, 0.3))
            .with_max_continuations(2)
            .run("test")
            .await;
        assert_eq!(
            outcome.state,
            GenerationState::Complete("1. Intro\n2. Methods\n3. Results".into())
        );
        assert_eq!(outcome.continuations, 1);
        let prompts = model.prompts();
        assert_eq!(prompts[1], "PROMPT:1. Intro\n2. Meth");
    }

    #[tokio::test]
    async fn failure_reports_reason() {
        let model = WordModel::new(|_| Err(LlmError::Request("connection refused".into())));
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .run("test")
            .await;
        assert!(outcome.failure().unwrap().contains("connection refused"));
        assert!(outcome.failed_after.is_some());
        assert!(outcome.text().is_none());
    }

    #[tokio::test]
    async fn failed_continuation_keeps_earlier_text() {
        let calls = AtomicUsize::new(0);
        let model = WordModel::new(move |_| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Generation::length("1. Intro"))
            } else {
                Err(LlmError::Request("timed out".into()))
            }
        });
        let outcome = GenerationTask::new(&model, GenerationRequest::new("p", 16, 0.3))
            .with_max_continuations(1)
            .run("test")
            .await;
        assert_eq!(outcome.state, GenerationState::Truncated("1. Intro".into()));
    }
}
