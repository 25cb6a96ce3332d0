//! Events and handlers for pipeline observability.
//!
//! The pipeline reports progress, degradation and quality warnings through
//! [`PipelineEvent`] variants. Callers implement [`EventHandler`] to observe
//! them for progress display, metrics, or tests.
//!
//! Quality warnings and degradation are also logged with `warn!` at the
//! point they happen, so [`LoggingHandler`] reports them at `debug` only.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Progress logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use std::fmt;

use tracing::{debug, info};

// ── Events ─────────────────────────────────────────────────────────

/// Pipeline stage that issues LLM calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    SinglePassOutline,
    PartialOutline,
    Fusion,
    SectionNotes,
    DocumentNotes,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::SinglePassOutline => write!(f, "single-pass outline"),
            Stage::PartialOutline => write!(f, "partial outline"),
            Stage::Fusion => write!(f, "fusion"),
            Stage::SectionNotes => write!(f, "section notes"),
            Stage::DocumentNotes => write!(f, "document notes"),
        }
    }
}

/// Events emitted during a pipeline run.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    /// A run started.
    RunStarted { trace_id: &'a str, operation: &'a str },
    /// The content budget for a stage was computed.
    BudgetComputed {
        stage: Stage,
        max_content_tokens: usize,
    },
    /// The transcript fits one prompt; no chunking.
    SinglePass { transcript_tokens: usize },
    /// The transcript was split into chunks.
    ChunksPlanned {
        count: usize,
        max_content_tokens: usize,
        overlap_tokens: usize,
        exact_tokens: bool,
    },
    /// A partial outline was produced for a chunk.
    PartialOutlineReady { number: usize, total: usize },
    /// A chunk produced no usable outline and was left out.
    ChunkDropped {
        number: usize,
        total: usize,
        reason: &'a str,
    },
    /// Only one partial outline survived; fusion was skipped.
    FusionSkipped,
    /// The master outline is ready.
    OutlineReady { fused: bool, top_level_entries: usize },
    /// A prompt is close to the context window.
    PromptNearLimit {
        stage: Stage,
        prompt_tokens: usize,
        context_window: usize,
    },
    /// A prompt plus its reserved output exceeds the context window.
    PromptExceedsWindow {
        stage: Stage,
        prompt_tokens: usize,
        output_tokens: usize,
        context_window: usize,
    },
    /// A generation hit its output budget and was kept as-is.
    Truncated { stage: Stage, label: &'a str },
    /// The model stopped for a reason other than a natural stop or the
    /// output limit (e.g. a content filter). The text was kept.
    UnusualFinish { label: &'a str, reason: &'a str },
    /// Context was gathered for a section.
    ContextGathered {
        ordinal: usize,
        source: &'a str,
        tokens: usize,
    },
    /// Notes were produced for a section.
    SectionReady { ordinal: usize, total: usize },
    /// A section produced no notes and was omitted.
    SectionFailed {
        ordinal: usize,
        total: usize,
        reason: &'a str,
    },
    /// A run finished.
    RunFinished {
        trace_id: &'a str,
        usage_summary: &'a str,
    },
}

/// Handler for pipeline events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```
/// use notecraft::events::{EventHandler, PipelineEvent};
///
/// struct Progress;
///
/// impl EventHandler for Progress {
///     fn on_event(&self, event: &PipelineEvent<'_>) {
///         if let PipelineEvent::SectionReady { ordinal, total } = event {
///             eprintln!("section {ordinal}/{total} done");
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        let _ = event;
    }
}

/// A handler that ignores all events.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
pub struct FnEventHandler<F>(F)
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&PipelineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(progress_bar);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs progress via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted {
                trace_id,
                operation,
            } => {
                info!("[{trace_id}] {operation} started");
            }
            PipelineEvent::BudgetComputed {
                stage,
                max_content_tokens,
            } => {
                debug!("{stage} budget: {max_content_tokens} content tokens");
            }
            PipelineEvent::SinglePass { transcript_tokens } => {
                info!("Transcript fits one prompt ({transcript_tokens} tokens), single pass");
            }
            PipelineEvent::ChunksPlanned {
                count,
                max_content_tokens,
                overlap_tokens,
                exact_tokens,
            } => {
                info!(
                    "Split into {count} chunk(s) of <= {max_content_tokens} tokens, overlap {overlap_tokens}{}",
                    if *exact_tokens { "" } else { " (estimated from words)" }
                );
            }
            PipelineEvent::PartialOutlineReady { number, total } => {
                info!("Partial outline {number}/{total} ready");
            }
            PipelineEvent::ChunkDropped {
                number,
                total,
                reason,
            } => {
                debug!("Chunk {number}/{total} dropped: {reason}");
            }
            PipelineEvent::FusionSkipped => {
                info!("One partial outline, fusion skipped");
            }
            PipelineEvent::OutlineReady {
                fused,
                top_level_entries,
            } => {
                info!(
                    "Master outline ready: {top_level_entries} top-level entries{}",
                    if *fused { " (fused)" } else { "" }
                );
            }
            PipelineEvent::PromptNearLimit {
                stage,
                prompt_tokens,
                context_window,
            } => {
                debug!("{stage} prompt near limit: {prompt_tokens}/{context_window} tokens");
            }
            PipelineEvent::PromptExceedsWindow {
                stage,
                prompt_tokens,
                output_tokens,
                context_window,
            } => {
                debug!(
                    "{stage} prompt exceeds window: {prompt_tokens} + {output_tokens} > {context_window}"
                );
            }
            PipelineEvent::Truncated { stage, label } => {
                debug!("{stage} truncated: {label}");
            }
            PipelineEvent::UnusualFinish { label, reason } => {
                debug!("{label} finished with '{reason}'");
            }
            PipelineEvent::ContextGathered {
                ordinal,
                source,
                tokens,
            } => {
                debug!("Section {ordinal}: {tokens} context tokens from {source}");
            }
            PipelineEvent::SectionReady { ordinal, total } => {
                info!("Section {ordinal}/{total} notes ready");
            }
            PipelineEvent::SectionFailed {
                ordinal,
                total,
                reason,
            } => {
                debug!("Section {ordinal}/{total} omitted: {reason}");
            }
            PipelineEvent::RunFinished {
                trace_id,
                usage_summary,
            } => {
                info!("[{trace_id}] finished: {usage_summary}");
            }
        }
    }
}
