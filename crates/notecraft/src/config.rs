//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable of a run: the context window and
//! safety factor, chunk overlap, per-stage output reservations and
//! temperatures, the notes context source and the word heuristic ratio.
//! Values are checked once by [`PipelineConfig::validate`] before any work.

use crate::budget::{DEFAULT_SAFETY_FACTOR, DEFAULT_WORDS_PER_TOKEN};
use crate::error::{PipelineError, PipelineResult};
use crate::notes::ContextSource;

/// Default context window in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 16_384;

/// Configuration for a [`Pipeline`](crate::pipeline::Pipeline) run.
///
/// # Example
///
/// ```
/// use notecraft::config::PipelineConfig;
/// use notecraft::notes::ContextSource;
///
/// let config = PipelineConfig::new(8192)
///     .with_safety_factor(0.7)
///     .with_overlap_tokens(200)
///     .with_context_source(ContextSource::VectorSearch { top_k: 3 });
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Model context window in tokens.
    pub context_window: usize,
    /// Fraction of the window the pipeline fills, in `(0, 1]`.
    pub safety_factor: f64,
    /// Tokens shared by consecutive chunks.
    pub overlap_tokens: usize,

    /// Output reserved for each partial (per-chunk) outline.
    pub partial_outline_tokens: u32,
    /// Output reserved for a single-pass outline of the whole transcript.
    pub full_outline_tokens: u32,
    /// Output reserved for the fused master outline.
    pub fused_outline_tokens: u32,
    /// Output reserved for each section's notes.
    pub notes_tokens: u32,
    /// Output reserved for whole-document notes.
    pub document_notes_tokens: u32,

    pub outline_temperature: f32,
    pub fusion_temperature: f32,
    pub notes_temperature: f32,

    /// Where section notes get their context from.
    pub context_source: ContextSource,
    /// Outline titles used as vector-search queries for whole-document notes.
    pub max_query_terms: usize,
    /// Chunk size (tokens) of the passages sent to the vector store.
    pub retrieval_chunk_tokens: usize,

    /// Words per token for the heuristic used without a tokenizer.
    pub words_per_token: f64,
    /// Extra calls allowed to resume a truncated generation.
    pub max_continuations: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            safety_factor: DEFAULT_SAFETY_FACTOR,
            overlap_tokens: 200,
            partial_outline_tokens: 1024,
            full_outline_tokens: 4096,
            fused_outline_tokens: 4096,
            notes_tokens: 2048,
            document_notes_tokens: 4096,
            outline_temperature: 0.3,
            fusion_temperature: 0.2,
            notes_temperature: 0.5,
            context_source: ContextSource::Transcript,
            max_query_terms: 3,
            retrieval_chunk_tokens: 512,
            words_per_token: DEFAULT_WORDS_PER_TOKEN,
            max_continuations: 0,
        }
    }
}

impl PipelineConfig {
    /// Defaults for a model with the given context window.
    pub fn new(context_window: usize) -> Self {
        Self {
            context_window,
            ..Default::default()
        }
    }

    pub fn with_safety_factor(mut self, factor: f64) -> Self {
        self.safety_factor = factor;
        self
    }

    pub fn with_overlap_tokens(mut self, tokens: usize) -> Self {
        self.overlap_tokens = tokens;
        self
    }

    /// Set the outline output reservations (partial, single-pass, fused).
    pub fn with_outline_tokens(mut self, partial: u32, full: u32, fused: u32) -> Self {
        self.partial_outline_tokens = partial;
        self.full_outline_tokens = full;
        self.fused_outline_tokens = fused;
        self
    }

    pub fn with_notes_tokens(mut self, tokens: u32) -> Self {
        self.notes_tokens = tokens;
        self
    }

    pub fn with_document_notes_tokens(mut self, tokens: u32) -> Self {
        self.document_notes_tokens = tokens;
        self
    }

    pub fn with_context_source(mut self, source: ContextSource) -> Self {
        self.context_source = source;
        self
    }

    pub fn with_words_per_token(mut self, ratio: f64) -> Self {
        self.words_per_token = ratio;
        self
    }

    pub fn with_max_continuations(mut self, n: u32) -> Self {
        self.max_continuations = n;
        self
    }

    /// Check every value once. Returns the first problem found.
    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if self.context_window == 0 {
            return invalid("context_window must be positive".into());
        }
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return invalid(format!(
                "safety_factor must be in (0, 1], got {}",
                self.safety_factor
            ));
        }
        if !(self.words_per_token.is_finite() && self.words_per_token > 0.0) {
            return invalid(format!(
                "words_per_token must be positive, got {}",
                self.words_per_token
            ));
        }
        let reservations = [
            ("partial_outline_tokens", self.partial_outline_tokens),
            ("full_outline_tokens", self.full_outline_tokens),
            ("fused_outline_tokens", self.fused_outline_tokens),
            ("notes_tokens", self.notes_tokens),
            ("document_notes_tokens", self.document_notes_tokens),
        ];
        for (name, tokens) in reservations {
            if tokens == 0 {
                return invalid(format!("{name} must be positive"));
            }
            if tokens as usize >= self.context_window {
                return invalid(format!(
                    "{name} ({tokens}) must be smaller than the context window ({})",
                    self.context_window
                ));
            }
        }
        let temperatures = [
            ("outline_temperature", self.outline_temperature),
            ("fusion_temperature", self.fusion_temperature),
            ("notes_temperature", self.notes_temperature),
        ];
        for (name, t) in temperatures {
            if !(t.is_finite() && t >= 0.0) {
                return invalid(format!("{name} must be non-negative, got {t}"));
            }
        }
        if let ContextSource::VectorSearch { top_k: 0 } = self.context_source {
            return invalid("vector search top_k must be positive".into());
        }
        if self.retrieval_chunk_tokens == 0 {
            return invalid("retrieval_chunk_tokens must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.outline_temperature, 0.3);
        assert!(config.partial_outline_tokens < config.full_outline_tokens);
    }

    #[test]
    fn builder_sets_fields() {
        let config = PipelineConfig::new(8192)
            .with_safety_factor(0.7)
            .with_overlap_tokens(100)
            .with_outline_tokens(512, 1024, 2048)
            .with_notes_tokens(700)
            .with_max_continuations(2);
        assert_eq!(config.context_window, 8192);
        assert_eq!(config.fused_outline_tokens, 2048);
        assert_eq!(config.notes_tokens, 700);
        assert_eq!(config.max_continuations, 2);
    }

    #[test]
    fn rejects_bad_values() {
        let cases = [
            PipelineConfig::new(0),
            PipelineConfig::default().with_safety_factor(0.0),
            PipelineConfig::default().with_safety_factor(1.5),
            PipelineConfig::default().with_safety_factor(f64::NAN),
            PipelineConfig::default().with_words_per_token(0.0),
            PipelineConfig::default().with_notes_tokens(0),
            PipelineConfig::new(1000).with_outline_tokens(512, 1000, 512),
            PipelineConfig::default().with_context_source(ContextSource::VectorSearch { top_k: 0 }),
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "{config:?}"
            );
        }
    }
}
