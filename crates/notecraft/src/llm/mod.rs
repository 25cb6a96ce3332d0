//! The LLM capability: tokenization and text generation.
//!
//! The pipeline never owns a model. Callers construct one adapter (a
//! [`llama::LlamaServerClient`] for a local llama.cpp server, an
//! [`openrouter::OpenRouterClient`] for a cloud model, or a test double) and
//! pass it in by reference. The capability is split in two traits because a
//! cloud model can generate but cannot tokenize; without a [`Tokenizer`] the
//! pipeline falls back to the word heuristic in [`crate::budget`].
//!
//! Trait methods return boxed futures ([`LlmFuture`]) so the traits stay
//! object-safe and can be used as `&dyn Tokenizer` / `&dyn TextGenerator`.

pub mod generation;
pub mod llama;
pub mod openrouter;
pub mod retry;
pub mod serial;
pub mod usage;

use std::future::Future;
use std::pin::Pin;

use crate::budget;
use crate::error::LlmError;
use tracing::warn;

pub use generation::{GenerationOutcome, GenerationState};

/// Token identifier as produced by the tokenizer.
pub type TokenId = i32;

/// Boxed future returned by LLM trait methods.
pub type LlmFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LlmError>> + Send + 'a>>;

// ── Traits ─────────────────────────────────────────────────────────

/// Converts between text and the model's token sequence.
pub trait Tokenizer: Send + Sync {
    /// Tokenize `text` without adding special tokens.
    fn tokenize<'a>(&'a self, text: &'a str) -> LlmFuture<'a, Vec<TokenId>>;

    /// Decode a token slice back into text.
    fn detokenize<'a>(&'a self, tokens: &'a [TokenId]) -> LlmFuture<'a, String>;
}

/// Produces a completion for a prompt.
pub trait TextGenerator: Send + Sync {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation>;
}

/// A model that can both tokenize and generate.
pub trait LanguageModel: Tokenizer + TextGenerator {}

impl<T: Tokenizer + TextGenerator> LanguageModel for T {}

// ── Request / response types ───────────────────────────────────────

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Maximum tokens the model may generate.
    pub max_tokens: u32,
    pub temperature: f32,
    /// Stop sequences, if any.
    pub stop: Vec<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature,
            stop: Vec::new(),
        }
    }

    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end (end-of-sequence token or stop word).
    Stop,
    /// The output budget ran out; the text is likely incomplete.
    Length,
    /// Anything else the backend reported.
    Other(String),
}

impl FinishReason {
    /// Classify a raw backend finish reason. A missing reason counts as a
    /// natural stop.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()) {
            None => FinishReason::Stop,
            Some(r) => match r.as_str() {
                "" | "stop" | "eos" | "eos_token" | "word" | "end_turn" | "stop_sequence" => {
                    FinishReason::Stop
                }
                "length" | "limit" | "max_tokens" => FinishReason::Length,
                _ => FinishReason::Other(r),
            },
        }
    }
}

/// Token counts reported by the backend, when it reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// A completion returned by a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
}

impl Generation {
    /// A naturally finished completion with no usage information.
    pub fn stop(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
        }
    }

    /// A completion cut off by the output budget.
    pub fn length(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: FinishReason::Length,
            usage: TokenUsage::default(),
        }
    }
}

// ── Token counting ─────────────────────────────────────────────────

/// Counts tokens exactly through a [`Tokenizer`], or approximately from
/// word counts when no tokenizer is available.
#[derive(Clone, Copy)]
pub enum TokenCounter<'a> {
    Exact(&'a dyn Tokenizer),
    Approximate { words_per_token: f64 },
}

impl<'a> TokenCounter<'a> {
    pub fn is_exact(&self) -> bool {
        matches!(self, TokenCounter::Exact(_))
    }

    /// The tokenizer behind an exact counter.
    pub fn tokenizer(&self) -> Option<&'a dyn Tokenizer> {
        match self {
            TokenCounter::Exact(t) => Some(*t),
            TokenCounter::Approximate { .. } => None,
        }
    }

    /// Count the tokens in `text`.
    pub async fn count(&self, text: &str) -> Result<usize, LlmError> {
        match self {
            TokenCounter::Exact(tokenizer) => Ok(tokenizer.tokenize(text).await?.len()),
            TokenCounter::Approximate { words_per_token } => {
                Ok(budget::estimate_tokens_from_words(text, *words_per_token))
            }
        }
    }

    /// Count the tokens in `text`, falling back to the word heuristic if the
    /// tokenizer fails. Used where the count only feeds a warning.
    pub async fn count_or_estimate(&self, text: &str, words_per_token: f64) -> usize {
        match self.count(text).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Tokenizer failed, estimating from word count: {e}");
                budget::estimate_tokens_from_words(text, words_per_token)
            }
        }
    }
}

impl std::fmt::Debug for TokenCounter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenCounter::Exact(_) => write!(f, "TokenCounter::Exact"),
            TokenCounter::Approximate { words_per_token } => {
                write!(f, "TokenCounter::Approximate({words_per_token})")
            }
        }
    }
}
