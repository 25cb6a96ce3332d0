//! Outline generation.
//!
//! [`generate_outline`] asks the model for a numbered outline of one chunk
//! (partial mode, numbering local to the chunk) or of the whole transcript
//! (single-pass mode). Failures never propagate: a chunk that yields nothing
//! comes back as a [`PartialOutline`] without text, and the pipeline drops it.
//!
//! Submodules:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`fusion`] | Merging partial outlines into one master outline |
//! | [`sections`] | Splitting the master outline into top-level sections |
//! | [`parse`] | Typed parsing of numbered outline text |

pub mod fusion;
pub mod parse;
pub mod sections;

use tracing::warn;

use crate::budget::OUTLINE_NEAR_LIMIT;
use crate::events::{PipelineEvent, Stage};
use crate::llm::GenerationRequest;
use crate::llm::generation::GenerationState;
use crate::pipeline::StageContext;
use crate::prompts;

pub use fusion::fuse;
pub use parse::{OutlineItem, ParsedOutline, parse_outline};
pub use sections::{OutlineSection, split_sections};

/// Which outline prompt to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineMode {
    /// The whole transcript in one prompt.
    SinglePass,
    /// Chunk `number` (1-based) of `total`.
    Partial { number: usize, total: usize },
}

impl OutlineMode {
    fn stage(&self) -> Stage {
        match self {
            OutlineMode::SinglePass => Stage::SinglePassOutline,
            OutlineMode::Partial { .. } => Stage::PartialOutline,
        }
    }

    fn label(&self) -> String {
        match self {
            OutlineMode::SinglePass => "single-pass outline".to_string(),
            OutlineMode::Partial { number, total } => format!("partial outline {number}/{total}"),
        }
    }
}

/// How an outline generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionStatus {
    Ok,
    /// Output budget exhausted; text kept.
    Truncated,
    /// The model returned nothing.
    Empty,
    /// The LLM call failed.
    LlmError(String),
}

/// Outline of one chunk (or of the whole transcript in single-pass mode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialOutline {
    pub mode: OutlineMode,
    /// Outline text; `None` when the generation produced nothing usable.
    pub text: Option<String>,
    pub status: CompletionStatus,
}

impl PartialOutline {
    pub fn is_usable(&self) -> bool {
        self.text.is_some()
    }
}

/// The globally numbered outline of the whole transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterOutline {
    pub text: String,
    /// Whether an LLM fusion call produced this outline.
    pub fused: bool,
    /// Whether the generation that produced it hit its output budget.
    pub truncated: bool,
}

impl MasterOutline {
    /// Wrap an outline produced elsewhere (e.g. loaded from disk).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            fused: false,
            truncated: false,
        }
    }

    pub fn parse(&self) -> ParsedOutline {
        parse_outline(&self.text)
    }

    pub fn sections(&self) -> Vec<OutlineSection> {
        split_sections(&self.text)
    }
}

/// Generate an outline for `text`.
pub async fn generate_outline(ctx: &StageContext<'_>, text: &str, mode: OutlineMode) -> PartialOutline {
    let config = ctx.config();
    let (prompt, max_tokens) = match mode {
        OutlineMode::SinglePass => (prompts::full_outline(text), config.full_outline_tokens),
        OutlineMode::Partial { number, total } => (
            prompts::partial_outline(text, number, total),
            config.partial_outline_tokens,
        ),
    };
    let stage = mode.stage();
    let label = mode.label();

    ctx.check_prompt(stage, &prompt, max_tokens, OUTLINE_NEAR_LIMIT)
        .await;

    let request = GenerationRequest::new(prompt, max_tokens, config.outline_temperature);
    let outcome = ctx.generate(&label, request).await;

    let (text, status) = match outcome.state {
        GenerationState::Complete(t) if !t.is_empty() => (Some(t), CompletionStatus::Ok),
        GenerationState::Truncated(t) if !t.is_empty() => {
            warn!("{label} hit the {max_tokens}-token output limit and may be incomplete");
            ctx.emit(&PipelineEvent::Truncated {
                stage,
                label: &label,
            });
            (Some(t), CompletionStatus::Truncated)
        }
        GenerationState::Failed(reason) => {
            warn!("{label} failed: {reason}");
            (None, CompletionStatus::LlmError(reason))
        }
        _ => {
            warn!("{label}: the model returned an empty outline");
            (None, CompletionStatus::Empty)
        }
    };

    PartialOutline { mode, text, status }
}
