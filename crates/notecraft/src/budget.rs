//! Token budget calculation.
//!
//! Every stage that sends content to the model recomputes how many content
//! tokens fit: the usable window (`context_window * safety_factor`) minus
//! the measured prompt template overhead minus the output tokens reserved
//! for the model's answer. A budget that is not strictly positive is fatal.
//!
//! This module is also the only place that converts between words and
//! tokens. When no tokenizer is available, the rest of the crate estimates
//! through [`estimate_tokens_from_words`] and [`words_for_tokens`].

use crate::error::{LlmError, PipelineError, PipelineResult};
use crate::llm::TokenCounter;

/// Default fraction of the context window the pipeline lets itself use.
pub const DEFAULT_SAFETY_FACTOR: f64 = 0.8;

/// Default words-per-token ratio for the word heuristic (English prose
/// averages roughly three words per four tokens).
pub const DEFAULT_WORDS_PER_TOKEN: f64 = 0.75;

/// Prompt-to-window fraction above which an outline prompt is flagged.
pub const OUTLINE_NEAR_LIMIT: f64 = 0.90;

/// Prompt-to-window fraction above which a fusion prompt is flagged.
pub const FUSION_NEAR_LIMIT: f64 = 0.85;

/// Content budget for one kind of prompt.
///
/// # Example
///
/// ```
/// use notecraft::budget::TokenBudget;
///
/// let budget = TokenBudget::new(8192, 0.5)
///     .with_prompt_overhead(300)
///     .with_output_reserve(1024);
/// assert_eq!(budget.max_content_tokens().unwrap(), 4096 - 300 - 1024);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBudget {
    context_window: usize,
    safety_factor: f64,
    prompt_overhead_tokens: usize,
    output_reserve_tokens: usize,
}

impl TokenBudget {
    pub fn new(context_window: usize, safety_factor: f64) -> Self {
        Self {
            context_window,
            safety_factor,
            prompt_overhead_tokens: 0,
            output_reserve_tokens: 0,
        }
    }

    /// Tokens consumed by the prompt template with its content slot empty.
    pub fn with_prompt_overhead(mut self, tokens: usize) -> Self {
        self.prompt_overhead_tokens = tokens;
        self
    }

    /// Tokens reserved for the model's output.
    pub fn with_output_reserve(mut self, tokens: usize) -> Self {
        self.output_reserve_tokens = tokens;
        self
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    /// The part of the window the pipeline allows itself to fill.
    pub fn usable_tokens(&self) -> f64 {
        self.context_window as f64 * self.safety_factor
    }

    /// Tokens available for content, or [`PipelineError::NonPositiveBudget`].
    pub fn max_content_tokens(&self) -> PipelineResult<usize> {
        compute_budget(
            self.context_window,
            self.safety_factor,
            self.prompt_overhead_tokens,
            self.output_reserve_tokens,
        )
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        let content = match self.max_content_tokens() {
            Ok(n) => n.to_string(),
            Err(_) => "none".to_string(),
        };
        format!(
            "budget: {content} content tokens ({} x {:.2} window, {} overhead, {} reserved)",
            self.context_window,
            self.safety_factor,
            self.prompt_overhead_tokens,
            self.output_reserve_tokens,
        )
    }
}

/// Tokens available for content in one prompt.
///
/// `context_window * safety_factor - prompt_overhead_tokens - output_reserve_tokens`,
/// floored. Fails with [`PipelineError::NonPositiveBudget`] unless the usable
/// window strictly exceeds overhead plus reserve.
pub fn compute_budget(
    context_window: usize,
    safety_factor: f64,
    prompt_overhead_tokens: usize,
    output_reserve_tokens: usize,
) -> PipelineResult<usize> {
    let usable = context_window as f64 * safety_factor;
    let remaining = usable - prompt_overhead_tokens.saturating_add(output_reserve_tokens) as f64;
    if remaining.is_nan() || remaining <= 0.0 {
        return Err(PipelineError::NonPositiveBudget {
            context_window,
            safety_factor,
            prompt_overhead_tokens,
            output_reserve_tokens,
        });
    }
    Ok((remaining.floor() as usize).max(1))
}

/// Tokens consumed by a prompt template rendered with an empty content slot.
pub async fn measure_prompt_overhead(
    counter: &TokenCounter<'_>,
    empty_prompt: &str,
) -> Result<usize, LlmError> {
    counter.count(empty_prompt).await
}

/// Estimated token count of `text` from its word count.
pub fn estimate_tokens_from_words(text: &str, words_per_token: f64) -> usize {
    let words = text.split_whitespace().count();
    if words == 0 {
        return 0;
    }
    (words as f64 / words_per_token).ceil() as usize
}

/// How many words are expected to fit in `tokens` tokens.
pub fn words_for_tokens(tokens: usize, words_per_token: f64) -> usize {
    (tokens as f64 * words_per_token).floor() as usize
}

/// How a prompt relates to the context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptFit {
    Fits,
    /// The prompt alone is above the warning fraction of the window.
    NearLimit { prompt_tokens: usize },
    /// Prompt plus reserved output does not fit at all.
    ExceedsWindow {
        prompt_tokens: usize,
        output_tokens: usize,
    },
}

/// Classify a prompt against the context window. Neither outcome is fatal;
/// callers log a warning and proceed.
pub fn check_prompt_fit(
    prompt_tokens: usize,
    output_tokens: usize,
    context_window: usize,
    warn_fraction: f64,
) -> PromptFit {
    if prompt_tokens.saturating_add(output_tokens) > context_window {
        PromptFit::ExceedsWindow {
            prompt_tokens,
            output_tokens,
        }
    } else if prompt_tokens as f64 > context_window as f64 * warn_fraction {
        PromptFit::NearLimit { prompt_tokens }
    } else {
        PromptFit::Fits
    }
}
