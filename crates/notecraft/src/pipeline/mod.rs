//! Orchestration of the outline and notes stages.
//!
//! A [`Pipeline`] owns one run's configuration, LLM capability and usage
//! ledger. Its operations issue LLM calls strictly one after another:
//!
//! ```text
//! transcript ─► budget ─► fits? ── yes ─► single-pass outline ─────────┐
//!                           │                                          │
//!                           no ─► chunks ─► partial outlines ─► fusion ┤
//!                                                                      ▼
//!                      final document ◄─ section notes ◄─ sections ◄─ master outline
//! ```
//!
//! Every stage recomputes its content budget from its own template and
//! output reservation. Failures of single chunks or sections degrade the
//! result (recorded on [`OutlineRun`] / [`NotesRun`]); only the conditions in
//! [`PipelineError`] abort an operation.

pub mod stage;

use tracing::{info, warn};

use crate::chunk;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::events::{EventHandler, PipelineEvent, Stage};
use crate::llm::usage::{UsageTracker, generate_trace_id};
use crate::llm::{LanguageModel, TextGenerator, Tokenizer};
use crate::notes::{self, ContextSource, FinalDocument, NotesStatus};
use crate::outline::{self, CompletionStatus, MasterOutline, OutlineMode};
use crate::prompts;
use crate::retrieval::{self, VectorSearch};
use crate::transcript::Transcript;

pub use stage::StageContext;
use stage::tokenizer_unavailable;

// ── Run results ────────────────────────────────────────────────────

/// Result of [`Pipeline::outline`].
#[derive(Debug, Clone)]
pub struct OutlineRun {
    pub outline: MasterOutline,
    /// Chunks the transcript was split into; 1 for a single-pass run.
    pub chunk_count: usize,
    pub single_pass: bool,
    /// 1-based numbers of chunks that produced no outline.
    pub dropped_chunks: Vec<usize>,
    /// 1-based numbers of chunks whose outline hit the output limit.
    pub truncated_chunks: Vec<usize>,
}

impl OutlineRun {
    /// Whether anything was lost or cut short along the way.
    pub fn degraded(&self) -> bool {
        !self.dropped_chunks.is_empty()
            || !self.truncated_chunks.is_empty()
            || self.outline.truncated
    }
}

/// Result of [`Pipeline::notes`].
#[derive(Debug, Clone)]
pub struct NotesRun {
    pub document: FinalDocument,
    /// Ordinals of sections whose notes hit the output limit.
    pub truncated_sections: Vec<usize>,
}

impl NotesRun {
    /// Ordinals of sections omitted from the document.
    pub fn failed_sections(&self) -> &[usize] {
        &self.document.omitted
    }

    pub fn degraded(&self) -> bool {
        !self.document.omitted.is_empty() || !self.truncated_sections.is_empty()
    }
}

/// Result of [`Pipeline::run`].
#[derive(Debug, Clone)]
pub struct FullRun {
    pub outline: OutlineRun,
    pub notes: NotesRun,
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Transcript to outline to notes.
///
/// Borrow the collaborators for the lifetime of the pipeline:
///
/// ```ignore
/// let model = LlamaServerClient::new(DEFAULT_LLAMA_URL)?;
/// let search = HttpVectorSearch::new("http://127.0.0.1:8000");
/// let pipeline = Pipeline::for_model(&model, PipelineConfig::new(8192))
///     .with_retriever(&search)
///     .with_event_handler(&LoggingHandler);
///
/// let run = pipeline.run(&transcript, "Lecture 3").await?;
/// println!("{}", run.notes.document.render());
/// ```
pub struct Pipeline<'a> {
    ctx: StageContext<'a>,
    retriever: Option<&'a dyn VectorSearch>,
    trace_id: String,
}

impl<'a> Pipeline<'a> {
    /// A pipeline that only generates. Token counts are estimated from
    /// words unless a tokenizer is attached.
    pub fn new(generator: &'a dyn TextGenerator, config: PipelineConfig) -> Self {
        Self {
            ctx: StageContext::new(generator, config),
            retriever: None,
            trace_id: generate_trace_id(),
        }
    }

    /// A pipeline with exact token counts from the model's own tokenizer.
    pub fn for_model(model: &'a dyn LanguageModel, config: PipelineConfig) -> Self {
        Self::new(model, config).with_tokenizer(model)
    }

    pub fn with_tokenizer(mut self, tokenizer: &'a dyn Tokenizer) -> Self {
        self.ctx = self.ctx.with_tokenizer(tokenizer);
        self
    }

    /// Attach a vector-search service for context retrieval and [`populate`](Self::populate).
    pub fn with_retriever(mut self, retriever: &'a dyn VectorSearch) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.ctx = self.ctx.with_event_handler(handler);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        self.ctx.config()
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Usage accumulated over every operation run so far.
    pub fn usage(&self) -> UsageTracker {
        self.ctx.usage()
    }

    fn start(&self, operation: &str) -> PipelineResult<()> {
        self.ctx.config().validate()?;
        info!("[{}] {operation} started", self.trace_id);
        self.ctx.emit(&PipelineEvent::RunStarted {
            trace_id: &self.trace_id,
            operation,
        });
        Ok(())
    }

    fn finish(&self, operation: &str) {
        let summary = self.ctx.usage().summary();
        info!("[{}] {operation} finished: {summary}", self.trace_id);
        self.ctx.emit(&PipelineEvent::RunFinished {
            trace_id: &self.trace_id,
            usage_summary: &summary,
        });
    }

    // ── Outline ────────────────────────────────────────────────────

    /// Produce the master outline of a transcript.
    ///
    /// A transcript that fits the single-pass budget gets one outline call.
    /// Otherwise it is chunked, each chunk is outlined, and the partial
    /// outlines are fused. Chunks that yield nothing are dropped with a
    /// warning; the operation fails only if none survive.
    pub async fn outline(&self, transcript: &Transcript) -> PipelineResult<OutlineRun> {
        self.start("outline")?;
        if transcript.is_blank() {
            return Err(PipelineError::EmptyTranscript);
        }
        let ctx = &self.ctx;
        let config = ctx.config();
        let counter = ctx.counter();

        let transcript_tokens = transcript
            .token_count(&counter)
            .await
            .map_err(|e| tokenizer_unavailable(e.into()))?;
        let single_pass_budget = ctx
            .content_budget(
                Stage::SinglePassOutline,
                &prompts::full_outline_skeleton(),
                config.full_outline_tokens,
            )
            .await
            .map_err(tokenizer_unavailable)?;

        let run = if transcript_tokens <= single_pass_budget {
            ctx.emit(&PipelineEvent::SinglePass { transcript_tokens });
            let result = outline::generate_outline(ctx, transcript.as_str(), OutlineMode::SinglePass).await;
            let truncated = result.status == CompletionStatus::Truncated;
            let text = result.text.ok_or(PipelineError::NoPartialOutlines)?;
            OutlineRun {
                outline: MasterOutline {
                    text,
                    fused: false,
                    truncated,
                },
                chunk_count: 1,
                single_pass: true,
                dropped_chunks: Vec::new(),
                truncated_chunks: Vec::new(),
            }
        } else {
            self.chunked_outline(transcript).await?
        };

        let sections = run.outline.sections().len();
        ctx.emit(&PipelineEvent::OutlineReady {
            fused: run.outline.fused,
            top_level_entries: sections,
        });
        if run.degraded() {
            warn!(
                "[{}] outline is degraded: {} chunk(s) dropped, {} truncated",
                self.trace_id,
                run.dropped_chunks.len(),
                run.truncated_chunks.len() + usize::from(run.outline.truncated)
            );
        }
        self.finish("outline");
        Ok(run)
    }

    async fn chunked_outline(&self, transcript: &Transcript) -> PipelineResult<OutlineRun> {
        let ctx = &self.ctx;
        let config = ctx.config();
        let counter = ctx.counter();

        let chunk_budget = ctx
            .content_budget(
                Stage::PartialOutline,
                &prompts::partial_outline_skeleton(),
                config.partial_outline_tokens,
            )
            .await
            .map_err(tokenizer_unavailable)?;
        let chunks = chunk::split(
            transcript.as_str(),
            chunk_budget,
            config.overlap_tokens,
            &counter,
        )
        .await
        .map_err(tokenizer_unavailable)?;
        ctx.emit(&PipelineEvent::ChunksPlanned {
            count: chunks.len(),
            max_content_tokens: chunk_budget,
            overlap_tokens: config.overlap_tokens,
            exact_tokens: counter.is_exact(),
        });

        let total = chunks.len();
        let mut partials = Vec::with_capacity(total);
        let mut dropped_chunks = Vec::new();
        let mut truncated_chunks = Vec::new();
        for chunk in &chunks {
            let number = chunk.number();
            let mode = OutlineMode::Partial { number, total };
            let result = outline::generate_outline(ctx, &chunk.text, mode).await;
            match result.text {
                Some(text) => {
                    if result.status == CompletionStatus::Truncated {
                        truncated_chunks.push(number);
                    }
                    partials.push(text);
                    ctx.emit(&PipelineEvent::PartialOutlineReady { number, total });
                }
                None => {
                    let reason = match &result.status {
                        CompletionStatus::LlmError(e) => e.as_str(),
                        _ => "empty outline",
                    };
                    warn!("Chunk {number}/{total} produced no outline and is left out ({reason})");
                    ctx.emit(&PipelineEvent::ChunkDropped {
                        number,
                        total,
                        reason,
                    });
                    dropped_chunks.push(number);
                }
            }
        }

        let outline = outline::fuse(ctx, &partials).await?;
        Ok(OutlineRun {
            outline,
            chunk_count: total,
            single_pass: false,
            dropped_chunks,
            truncated_chunks,
        })
    }

    // ── Notes ──────────────────────────────────────────────────────

    /// Develop every top-level section of `outline` into notes.
    ///
    /// Sections that yield nothing are omitted; the operation fails only if
    /// every section did.
    pub async fn notes(
        &self,
        transcript: &Transcript,
        outline: &MasterOutline,
        title: &str,
    ) -> PipelineResult<NotesRun> {
        self.start("notes")?;
        if transcript.is_blank() {
            return Err(PipelineError::EmptyTranscript);
        }
        let ctx = &self.ctx;
        let config = ctx.config();
        if matches!(config.context_source, ContextSource::VectorSearch { .. })
            && self.retriever.is_none()
        {
            return Err(PipelineError::InvalidConfig(
                "vector-search context requires a retriever".into(),
            ));
        }
        let sections = outline.sections();
        if sections.is_empty() {
            return Err(PipelineError::InvalidInput("outline is empty".into()));
        }

        let notes_budget = ctx
            .content_budget(
                Stage::SectionNotes,
                &prompts::section_notes_skeleton(),
                config.notes_tokens,
            )
            .await
            .map_err(tokenizer_unavailable)?;

        let total = sections.len();
        let counter = ctx.counter();
        let mut all_notes = Vec::with_capacity(total);
        let mut truncated_sections = Vec::new();
        for section in &sections {
            let section_tokens = counter
                .count_or_estimate(&section.text, config.words_per_token)
                .await;
            let context = notes::section_context(
                ctx,
                section,
                total,
                transcript.as_str(),
                self.retriever,
                notes_budget.saturating_sub(section_tokens),
            )
            .await;
            let result = notes::elaborate(ctx, section, total, context.as_deref()).await;

            let ordinal = section.ordinal;
            match &result.status {
                NotesStatus::Ok | NotesStatus::Truncated if result.is_usable() => {
                    if result.status == NotesStatus::Truncated {
                        truncated_sections.push(ordinal);
                    }
                    ctx.emit(&PipelineEvent::SectionReady { ordinal, total });
                }
                status => {
                    let reason = match status {
                        NotesStatus::LlmError(e) => e.as_str(),
                        _ => "no notes",
                    };
                    warn!("Section {ordinal}/{total} produced no notes and is omitted ({reason})");
                    ctx.emit(&PipelineEvent::SectionFailed {
                        ordinal,
                        total,
                        reason,
                    });
                }
            }
            all_notes.push(result);
        }

        let document = FinalDocument::assemble(title, all_notes);
        if document.is_empty() {
            return Err(PipelineError::NoSectionNotes);
        }
        self.finish("notes");
        Ok(NotesRun {
            document,
            truncated_sections,
        })
    }

    /// Outline then notes.
    pub async fn run(&self, transcript: &Transcript, title: &str) -> PipelineResult<FullRun> {
        let outline = self.outline(transcript).await?;
        let notes = self.notes(transcript, &outline.outline, title).await?;
        Ok(FullRun { outline, notes })
    }

    /// Notes for the whole outline in one call.
    ///
    /// Meant for a large-context generator. When a retriever is attached and
    /// the context source is vector search, passages for the outline's
    /// top-level titles are added to the prompt.
    pub async fn document_notes(
        &self,
        transcript: &Transcript,
        outline: &MasterOutline,
    ) -> PipelineResult<String> {
        self.start("document notes")?;
        if transcript.is_blank() {
            return Err(PipelineError::EmptyTranscript);
        }
        if outline.text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("outline is empty".into()));
        }
        let config = self.ctx.config();
        let context = match (config.context_source, self.retriever) {
            (ContextSource::VectorSearch { top_k }, Some(search)) => {
                retrieval::gather_outline_context(
                    search,
                    &outline.text,
                    config.max_query_terms,
                    top_k,
                )
                .await
            }
            _ => None,
        };
        let text = notes::elaborate_document(
            &self.ctx,
            &outline.text,
            transcript.as_str(),
            context.as_deref(),
        )
        .await?;
        self.finish("document notes");
        Ok(text)
    }

    /// Send the transcript to the vector store in retrieval-sized chunks.
    /// Returns whether the service accepted them.
    pub async fn populate(&self, transcript: &Transcript) -> PipelineResult<bool> {
        self.start("populate")?;
        let Some(search) = self.retriever else {
            return Err(PipelineError::InvalidConfig(
                "populate requires a retriever".into(),
            ));
        };
        if transcript.is_blank() {
            return Err(PipelineError::EmptyTranscript);
        }
        let config = self.ctx.config();
        let chunks = chunk::split(
            transcript.as_str(),
            config.retrieval_chunk_tokens,
            config.overlap_tokens,
            &self.ctx.counter(),
        )
        .await
        .map_err(tokenizer_unavailable)?;
        let texts: Vec<String> = chunks.into_iter().map(|c| c.text).collect();
        info!("Sending {} passage(s) to the vector store", texts.len());
        let accepted = search.populate(&texts).await;
        if !accepted {
            warn!("Vector store did not accept the transcript passages");
        }
        self.finish("populate");
        Ok(accepted)
    }
}
