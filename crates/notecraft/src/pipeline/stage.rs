//! Shared state for the stages of one pipeline.

use std::sync::Mutex;

use tracing::warn;

use crate::budget::{self, PromptFit, TokenBudget};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventHandler, NoopHandler, PipelineEvent, Stage};
use crate::llm::generation::{GenerationOutcome, GenerationTask};
use crate::llm::usage::UsageTracker;
use crate::llm::{GenerationRequest, TextGenerator, TokenCounter, Tokenizer};

/// What every stage needs: the LLM capability, the configuration, the event
/// sink and the run's usage ledger.
///
/// Stages run strictly one after another; the usage lock is never held
/// across an LLM call.
pub struct StageContext<'a> {
    generator: &'a dyn TextGenerator,
    tokenizer: Option<&'a dyn Tokenizer>,
    config: PipelineConfig,
    events: &'a dyn EventHandler,
    usage: Mutex<UsageTracker>,
}

impl<'a> StageContext<'a> {
    pub fn new(generator: &'a dyn TextGenerator, config: PipelineConfig) -> Self {
        Self {
            generator,
            tokenizer: None,
            config,
            events: &NoopHandler,
            usage: Mutex::new(UsageTracker::new()),
        }
    }

    /// Count tokens exactly with `tokenizer` instead of estimating from words.
    pub fn with_tokenizer(mut self, tokenizer: &'a dyn Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.events = handler;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn generator(&self) -> &'a dyn TextGenerator {
        self.generator
    }

    pub fn counter(&self) -> TokenCounter<'a> {
        match self.tokenizer {
            Some(tokenizer) => TokenCounter::Exact(tokenizer),
            None => TokenCounter::Approximate {
                words_per_token: self.config.words_per_token,
            },
        }
    }

    pub fn emit(&self, event: &PipelineEvent<'_>) {
        self.events.on_event(event);
    }

    /// Snapshot of the usage recorded so far.
    pub fn usage(&self) -> UsageTracker {
        self.usage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Content budget for a prompt whose empty rendering is `skeleton` and
    /// whose answer may take `output_tokens`.
    pub async fn content_budget(
        &self,
        stage: Stage,
        skeleton: &str,
        output_tokens: u32,
    ) -> PipelineResult<usize> {
        let overhead = budget::measure_prompt_overhead(&self.counter(), skeleton).await?;
        let budget = TokenBudget::new(self.config.context_window, self.config.safety_factor)
            .with_prompt_overhead(overhead)
            .with_output_reserve(output_tokens as usize);
        let max_content_tokens = budget.max_content_tokens()?;
        tracing::debug!("{stage} {}", budget.to_log_string());
        self.emit(&PipelineEvent::BudgetComputed {
            stage,
            max_content_tokens,
        });
        Ok(max_content_tokens)
    }

    /// Measure a filled prompt and warn if it is close to or over the window.
    pub async fn check_prompt(
        &self,
        stage: Stage,
        prompt: &str,
        output_tokens: u32,
        warn_fraction: f64,
    ) -> PromptFit {
        let prompt_tokens = self
            .counter()
            .count_or_estimate(prompt, self.config.words_per_token)
            .await;
        let context_window = self.config.context_window;
        let fit = budget::check_prompt_fit(
            prompt_tokens,
            output_tokens as usize,
            context_window,
            warn_fraction,
        );
        match fit {
            PromptFit::Fits => {}
            PromptFit::NearLimit { prompt_tokens } => {
                warn!(
                    "{stage} prompt uses {prompt_tokens} of {context_window} context tokens; \
                     output may be cut short"
                );
                self.emit(&PipelineEvent::PromptNearLimit {
                    stage,
                    prompt_tokens,
                    context_window,
                });
            }
            PromptFit::ExceedsWindow {
                prompt_tokens,
                output_tokens,
            } => {
                warn!(
                    "{stage} prompt ({prompt_tokens} tokens) plus {output_tokens} output tokens \
                     exceeds the {context_window}-token window"
                );
                self.emit(&PipelineEvent::PromptExceedsWindow {
                    stage,
                    prompt_tokens,
                    output_tokens,
                    context_window,
                });
            }
        }
        fit
    }

    /// Run one generation to a terminal state and record its usage.
    pub async fn generate(&self, label: &str, request: GenerationRequest) -> GenerationOutcome {
        let outcome = GenerationTask::new(self.generator, request)
            .with_max_continuations(self.config.max_continuations)
            .run(label)
            .await;

        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let last = outcome.stats.len().saturating_sub(1);
        for (i, stats) in outcome.stats.iter().enumerate() {
            usage.record(stats, i == last && outcome.is_truncated());
        }
        if let Some(elapsed) = outcome.failed_after {
            usage.record_failure(elapsed);
        }
        drop(usage);
        if let Some(reason) = &outcome.unusual_finish {
            self.emit(&PipelineEvent::UnusualFinish { label, reason });
        }
        outcome
    }
}

/// Map a tokenizer failure during budgeting to a fatal error.
pub(crate) fn tokenizer_unavailable(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::Llm(inner) => {
            PipelineError::LlmUnavailable(format!("tokenizer failed: {inner}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Generation;
    use crate::test_support::WordModel;

    #[tokio::test]
    async fn budget_uses_exact_overhead() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let ctx = StageContext::new(&model, PipelineConfig::new(1000).with_safety_factor(1.0))
            .with_tokenizer(&model);
        // 4 tokens of template, 100 reserved.
        let budget = ctx
            .content_budget(Stage::Fusion, "one two three four", 100)
            .await
            .unwrap();
        assert_eq!(budget, 896);
    }

    #[tokio::test]
    async fn budget_too_small_is_fatal() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let config = PipelineConfig::new(100)
            .with_safety_factor(0.5)
            .with_outline_tokens(40, 40, 40);
        let ctx = StageContext::new(&model, config).with_tokenizer(&model);
        let skeleton = crate::test_support::words(20);
        let err = ctx
            .content_budget(Stage::PartialOutline, &skeleton, 40)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NonPositiveBudget { .. }));
    }

    #[tokio::test]
    async fn oversized_prompt_is_flagged_not_rejected() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let ctx = StageContext::new(&model, PipelineConfig::new(100)).with_tokenizer(&model);
        let prompt = crate::test_support::words(95);
        let fit = ctx.check_prompt(Stage::Fusion, &prompt, 10, 0.85).await;
        assert!(matches!(fit, PromptFit::ExceedsWindow { .. }));
    }

    #[tokio::test]
    async fn unusual_finish_is_reported_as_event() {
        use crate::events::FnEventHandler;
        use crate::llm::FinishReason;
        use std::sync::Mutex;

        let model = WordModel::new(|_| {
            Ok(Generation {
                finish_reason: FinishReason::Other("content_filter".into()),
                ..Generation::stop("cut short")
            })
        });
        let seen = Mutex::new(Vec::new());
        let handler = FnEventHandler::new(|event| {
            if let PipelineEvent::UnusualFinish { label, reason } = event {
                seen.lock().unwrap().push(format!("{label}:{reason}"));
            }
        });
        let ctx = StageContext::new(&model, PipelineConfig::default()).with_event_handler(&handler);
        let outcome = ctx
            .generate("section 2", GenerationRequest::new("p", 10, 0.3))
            .await;
        assert_eq!(outcome.text(), Some("cut short"));
        assert_eq!(*seen.lock().unwrap(), vec!["section 2:content_filter".to_string()]);
    }

    #[tokio::test]
    async fn generate_records_usage() {
        let model = WordModel::new(|_| Ok(Generation::length("partial")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let outcome = ctx
            .generate("test", GenerationRequest::new("p", 10, 0.3))
            .await;
        assert!(outcome.is_truncated());
        let usage = ctx.usage();
        assert_eq!(usage.calls, 1);
        assert_eq!(usage.truncated_calls, 1);
    }
}
