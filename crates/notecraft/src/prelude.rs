//! Convenience re-exports for common `notecraft` types.
//!
//! ```ignore
//! use notecraft::prelude::*;
//! ```
//!
//! Covers what a typical caller needs to run the pipeline: the
//! [`Pipeline`] and its config, the LLM and vector-search adapters, event
//! handlers and the document store. Stage-level functions (chunking, fusion,
//! elaboration) stay in their modules.

// ── Pipeline ────────────────────────────────────────────────────────
pub use crate::config::PipelineConfig;
pub use crate::error::{LlmError, PipelineError, PipelineResult};
pub use crate::notes::{ContextSource, FinalDocument};
pub use crate::outline::MasterOutline;
pub use crate::pipeline::{FullRun, NotesRun, OutlineRun, Pipeline};
pub use crate::transcript::Transcript;

// ── Collaborators ───────────────────────────────────────────────────
pub use crate::llm::llama::{DEFAULT_LLAMA_URL, LlamaServerClient};
pub use crate::llm::openrouter::OpenRouterClient;
pub use crate::llm::retry::RetryConfig;
pub use crate::llm::serial::Serialized;
pub use crate::llm::{LanguageModel, TextGenerator, Tokenizer};
pub use crate::retrieval::{HttpVectorSearch, VectorSearch};
pub use crate::store::{DocumentStore, FsStore};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    PipelineEvent,
};
