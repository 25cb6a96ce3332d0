//! Section elaboration and document assembly.
//!
//! Each top-level outline section is developed into Markdown notes with one
//! LLM call, grounded on a context block chosen by [`ContextSource`]. A
//! section that yields nothing is omitted from the [`FinalDocument`] rather
//! than failing the run.

use tracing::{debug, warn};

use crate::budget::OUTLINE_NEAR_LIMIT;
use crate::chunk::UnitSequence;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{PipelineEvent, Stage};
use crate::llm::GenerationRequest;
use crate::llm::generation::GenerationState;
use crate::outline::OutlineSection;
use crate::pipeline::StageContext;
use crate::prompts;
use crate::retrieval::{self, VectorSearch};

/// Where section notes get their grounding context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    /// Passages retrieved from the vector store with the section text as query.
    VectorSearch { top_k: usize },
    /// The part of the raw transcript the section most likely covers.
    Transcript,
    /// No context; the prompt carries a placeholder.
    None,
}

impl ContextSource {
    pub fn name(&self) -> &'static str {
        match self {
            ContextSource::VectorSearch { .. } => "vector search",
            ContextSource::Transcript => "transcript",
            ContextSource::None => "none",
        }
    }
}

/// How a section elaboration ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotesStatus {
    Ok,
    Truncated,
    Empty,
    LlmError(String),
}

/// Notes for one outline section. `text` is empty when elaboration failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNotes {
    pub ordinal: usize,
    pub text: String,
    pub status: NotesStatus,
}

impl SectionNotes {
    pub fn is_usable(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// The assembled notes document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalDocument {
    pub title: String,
    /// Usable notes, in outline order.
    pub notes: Vec<SectionNotes>,
    /// Ordinals of sections that produced no notes.
    pub omitted: Vec<usize>,
}

impl FinalDocument {
    /// Keep usable notes in order and record the ordinals of the rest.
    pub fn assemble(title: impl Into<String>, notes: Vec<SectionNotes>) -> Self {
        let (kept, dropped): (Vec<_>, Vec<_>) = notes.into_iter().partition(|n| n.is_usable());
        Self {
            title: title.into(),
            notes: kept,
            omitted: dropped.into_iter().map(|n| n.ordinal).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// `# <title>` followed by the notes separated by blank lines.
    pub fn render(&self) -> String {
        let body: Vec<&str> = self.notes.iter().map(|n| n.text.trim()).collect();
        format!("# {}\n\n{}\n", self.title, body.join("\n\n"))
    }
}

// ── Elaboration ────────────────────────────────────────────────────

/// Develop one section into notes. Never fails: problems are logged and
/// reported through the returned status.
pub async fn elaborate(
    ctx: &StageContext<'_>,
    section: &OutlineSection,
    total: usize,
    context: Option<&str>,
) -> SectionNotes {
    let config = ctx.config();
    let max_tokens = config.notes_tokens;
    let ordinal = section.ordinal;
    let label = format!("notes for section {ordinal}/{total}");

    let prompt = prompts::section_notes(&section.text, context);
    ctx.check_prompt(Stage::SectionNotes, &prompt, max_tokens, OUTLINE_NEAR_LIMIT)
        .await;

    let request = GenerationRequest::new(prompt, max_tokens, config.notes_temperature);
    let outcome = ctx.generate(&label, request).await;

    let (text, status) = match outcome.state {
        GenerationState::Complete(t) if !t.is_empty() => (t, NotesStatus::Ok),
        GenerationState::Truncated(t) if !t.is_empty() => {
            warn!("{label} hit the {max_tokens}-token output limit and may be incomplete");
            ctx.emit(&PipelineEvent::Truncated {
                stage: Stage::SectionNotes,
                label: &label,
            });
            (t, NotesStatus::Truncated)
        }
        GenerationState::Failed(reason) => {
            warn!("{label} failed: {reason}");
            (String::new(), NotesStatus::LlmError(reason))
        }
        _ => {
            warn!("{label}: the model returned no notes");
            (String::new(), NotesStatus::Empty)
        }
    };

    SectionNotes {
        ordinal,
        text,
        status,
    }
}

/// Notes for a whole outline in one call, for large-context models.
///
/// The prompt carries the outline, the full transcript and optional
/// retrieved context. Unlike section elaboration, an empty answer is an
/// error since there is nothing to fall back to.
pub async fn elaborate_document(
    ctx: &StageContext<'_>,
    outline: &str,
    transcript: &str,
    context: Option<&str>,
) -> PipelineResult<String> {
    let config = ctx.config();
    let max_tokens = config.document_notes_tokens;
    let prompt = prompts::document_notes(outline, transcript, context);
    ctx.check_prompt(Stage::DocumentNotes, &prompt, max_tokens, OUTLINE_NEAR_LIMIT)
        .await;

    let label = "document notes";
    let request = GenerationRequest::new(prompt, max_tokens, config.notes_temperature);
    let outcome = ctx.generate(label, request).await;

    match outcome.state {
        GenerationState::Complete(text) if !text.is_empty() => Ok(text),
        GenerationState::Truncated(text) if !text.is_empty() => {
            warn!("Document notes hit the {max_tokens}-token output limit and may be incomplete");
            ctx.emit(&PipelineEvent::Truncated {
                stage: Stage::DocumentNotes,
                label,
            });
            Ok(text)
        }
        GenerationState::Failed(reason) => Err(PipelineError::DocumentNotesFailed(reason)),
        _ => Err(PipelineError::DocumentNotesFailed(
            "the model returned no notes".into(),
        )),
    }
}

// ── Context ────────────────────────────────────────────────────────

/// Context for one section, clipped to `budget_tokens`.
///
/// `budget_tokens` is what is left of the section-notes content budget once
/// the section text itself is counted.
pub async fn section_context(
    ctx: &StageContext<'_>,
    section: &OutlineSection,
    total: usize,
    transcript: &str,
    retriever: Option<&dyn VectorSearch>,
    budget_tokens: usize,
) -> Option<String> {
    let source = ctx.config().context_source;
    if budget_tokens == 0 {
        if source != ContextSource::None {
            warn!(
                "Section {} leaves no room for context; elaborating without it",
                section.ordinal
            );
        }
        return None;
    }

    let context = match (source, retriever) {
        (ContextSource::None, _) => None,
        (ContextSource::Transcript, _) => {
            transcript_window(ctx, transcript, section.ordinal, total, budget_tokens).await
        }
        (ContextSource::VectorSearch { top_k }, Some(search)) => {
            let passages = search.search(&section.text, top_k).await;
            match retrieval::format_passages(&passages) {
                Some(joined) => clip_to_tokens(ctx, &joined, budget_tokens).await,
                None => None,
            }
        }
        (ContextSource::VectorSearch { .. }, None) => {
            warn!("Vector-search context requested but no retriever is configured");
            None
        }
    };

    if let Some(text) = &context {
        let tokens = ctx
            .counter()
            .count_or_estimate(text, ctx.config().words_per_token)
            .await;
        debug!(
            "Section {}: {tokens} context tokens from {}",
            section.ordinal,
            source.name()
        );
        ctx.emit(&PipelineEvent::ContextGathered {
            ordinal: section.ordinal,
            source: source.name(),
            tokens,
        });
    }
    context
}

/// The first `budget_tokens` of `text`, or all of it when it fits.
async fn clip_to_tokens(ctx: &StageContext<'_>, text: &str, budget_tokens: usize) -> Option<String> {
    let counter = ctx.counter();
    let units = match UnitSequence::from_text(text, &counter).await {
        Ok(units) => units,
        Err(e) => {
            warn!("Could not measure context: {e}");
            return None;
        }
    };
    let max_units = units.units_for_tokens(budget_tokens);
    if units.len() <= max_units {
        return Some(text.to_string());
    }
    decode_nonblank(&units, 0, max_units).await
}

/// A window of the transcript sized to `budget_tokens`, centred on where
/// section `ordinal` of `total` falls if sections cover the lecture evenly.
async fn transcript_window(
    ctx: &StageContext<'_>,
    transcript: &str,
    ordinal: usize,
    total: usize,
    budget_tokens: usize,
) -> Option<String> {
    let counter = ctx.counter();
    let units = match UnitSequence::from_text(transcript, &counter).await {
        Ok(units) => units,
        Err(e) => {
            warn!("Could not measure transcript for context: {e}");
            return None;
        }
    };
    let max_units = units.units_for_tokens(budget_tokens);
    if max_units == 0 || units.is_empty() {
        return None;
    }
    if units.len() <= max_units {
        return Some(transcript.trim().to_string());
    }
    let (start, end) = centered_window(units.len(), max_units, ordinal, total);
    decode_nonblank(&units, start, end).await
}

/// `[start, end)` of width `width` within `len`, centred on the midpoint of
/// slice `ordinal` (1-based) of `total` equal slices and shifted to stay in
/// bounds.
pub(crate) fn centered_window(len: usize, width: usize, ordinal: usize, total: usize) -> (usize, usize) {
    let width = width.min(len);
    let total = total.max(1);
    let ordinal = ordinal.clamp(1, total);
    let center = ((2 * ordinal - 1) * len) / (2 * total);
    let start = center.saturating_sub(width / 2).min(len - width);
    (start, start + width)
}

async fn decode_nonblank(units: &UnitSequence<'_>, start: usize, end: usize) -> Option<String> {
    match units.decode(start, end).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(e) => {
            warn!("Could not decode context: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::error::LlmError;
    use crate::llm::Generation;
    use crate::test_support::{StaticSearch, WordModel, words};

    fn section(ordinal: usize, text: &str) -> OutlineSection {
        OutlineSection {
            ordinal,
            text: text.to_string(),
        }
    }

    #[test]
    fn document_renders_title_and_blank_line_separated_notes() {
        let notes = vec![
            SectionNotes {
                ordinal: 1,
                text: "## A\nalpha".into(),
                status: NotesStatus::Ok,
            },
            SectionNotes {
                ordinal: 2,
                text: String::new(),
                status: NotesStatus::Empty,
            },
            SectionNotes {
                ordinal: 3,
                text: "## C\ngamma\n".into(),
                status: NotesStatus::Truncated,
            },
        ];
        let doc = FinalDocument::assemble("Biology 101", notes);
        assert_eq!(doc.omitted, vec![2]);
        assert_eq!(doc.render(), "# Biology 101\n\n## A\nalpha\n\n## C\ngamma\n");
    }

    #[tokio::test]
    async fn elaborate_fills_section_and_context() {
        let model = WordModel::new(|_| Ok(Generation::stop("## Cells\n- detail")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let notes = elaborate(&ctx, &section(1, "1. Cells"), 1, Some("cells are small")).await;
        assert_eq!(notes.status, NotesStatus::Ok);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("1. Cells"));
        assert!(prompt.contains("cells are small"));
        assert!(prompt.contains(prompts::NO_INFORMATION_MARKER));
    }

    #[tokio::test]
    async fn missing_context_uses_placeholder() {
        let model = WordModel::new(|_| Ok(Generation::stop("notes")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        elaborate(&ctx, &section(1, "1. Cells"), 1, None).await;
        assert!(model.prompts()[0].contains(prompts::NO_CONTEXT_PLACEHOLDER));
    }

    #[tokio::test]
    async fn failed_elaboration_is_empty_not_error() {
        let model = WordModel::new(|_| Err(LlmError::Request("timeout".into())));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let notes = elaborate(&ctx, &section(2, "2. Energy"), 3, None).await;
        assert!(!notes.is_usable());
        assert!(matches!(notes.status, NotesStatus::LlmError(_)));
        assert_eq!(notes.ordinal, 2);
    }

    #[tokio::test]
    async fn document_notes_fail_when_empty() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let err = elaborate_document(&ctx, "1. A", "text", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DocumentNotesFailed(_)));
    }

    #[tokio::test]
    async fn document_notes_prompt_has_outline_transcript_and_context() {
        let model = WordModel::new(|_| Ok(Generation::stop("# Guide")));
        let ctx = StageContext::new(&model, PipelineConfig::default());
        let text = elaborate_document(&ctx, "1. Outline item", "spoken words", Some("retrieved"))
            .await
            .unwrap();
        assert_eq!(text, "# Guide");
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("1. Outline item"));
        assert!(prompt.contains("spoken words"));
        assert!(prompt.contains("retrieved"));
    }

    #[test]
    fn centered_window_follows_section_position() {
        assert_eq!(centered_window(100, 20, 1, 4), (2, 22));
        assert_eq!(centered_window(100, 20, 4, 4), (77, 97));
        assert_eq!(centered_window(100, 20, 1, 1), (40, 60));
        // Clamped at both ends.
        assert_eq!(centered_window(100, 60, 1, 10), (0, 60));
        assert_eq!(centered_window(100, 60, 10, 10), (40, 100));
        assert_eq!(centered_window(10, 50, 1, 2), (0, 10));
    }

    #[tokio::test]
    async fn transcript_context_is_clipped_to_budget() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let ctx = StageContext::new(&model, PipelineConfig::default()).with_tokenizer(&model);
        let transcript = words(100);

        let context = section_context(&ctx, &section(1, "1. A"), 4, &transcript, None, 20)
            .await
            .unwrap();
        assert_eq!(context.split_whitespace().count(), 20);
        assert!(context.starts_with("w2 "));

        let whole = section_context(&ctx, &section(1, "1. A"), 4, &transcript, None, 500)
            .await
            .unwrap();
        assert_eq!(whole, transcript);
    }

    #[tokio::test]
    async fn vector_context_queries_with_section_text() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let config = PipelineConfig::default()
            .with_context_source(ContextSource::VectorSearch { top_k: 2 });
        let ctx = StageContext::new(&model, config);
        let search = StaticSearch::new(&["first passage", "second passage", "third"]);
        let context = section_context(&ctx, &section(1, "1. Cells"), 1, "", Some(&search), 100)
            .await
            .unwrap();
        assert_eq!(context, "first passage\n\n---\n\nsecond passage");
        assert_eq!(search.queries.lock().unwrap()[0], ("1. Cells".to_string(), 2));
    }

    #[tokio::test]
    async fn no_context_source_or_budget_gives_none() {
        let model = WordModel::new(|_| Ok(Generation::stop("")));
        let config = PipelineConfig::default().with_context_source(ContextSource::None);
        let ctx = StageContext::new(&model, config);
        assert!(
            section_context(&ctx, &section(1, "1. A"), 1, "text", None, 100)
                .await
                .is_none()
        );

        let ctx = StageContext::new(&model, PipelineConfig::default());
        assert!(
            section_context(&ctx, &section(1, "1. A"), 1, "text", None, 0)
                .await
                .is_none()
        );
    }
}
