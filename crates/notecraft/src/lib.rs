//! Token-aware outline and notes synthesis for long lecture transcripts.
//!
//! `notecraft` turns a transcript that is far larger than a model's context
//! window into a globally numbered outline and detailed Markdown notes. The
//! core is a map-reduce pipeline: the transcript is split into overlapping,
//! token-bounded chunks, each chunk is outlined, and the partial outlines are
//! fused into one master outline whose sections are then elaborated one by
//! one. Every stage recomputes its content budget from its own prompt
//! template and output reservation, and a single failed chunk or section
//! degrades the result instead of aborting the run.
//!
//! # Getting started
//!
//! ```ignore
//! use notecraft::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PipelineError> {
//!     let model = LlamaServerClient::new(DEFAULT_LLAMA_URL)?;
//!     let config = PipelineConfig::new(8192).with_safety_factor(0.8);
//!
//!     let pipeline = Pipeline::for_model(&model, config)
//!         .with_event_handler(&LoggingHandler);
//!
//!     let transcript = Transcript::from_file("lecture01.txt")?;
//!     let run = pipeline.run(&transcript, "Lecture 1").await?;
//!
//!     println!("{}", run.notes.document.render());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Run the whole thing:** [`Pipeline`](pipeline::Pipeline) with
//!   [`PipelineConfig`](config::PipelineConfig). Results come back as
//!   [`OutlineRun`](pipeline::OutlineRun) and [`NotesRun`](pipeline::NotesRun),
//!   which also report what was dropped or truncated.
//!
//! - **Plug in a model:** implement [`Tokenizer`](llm::Tokenizer) and
//!   [`TextGenerator`](llm::TextGenerator), or use
//!   [`LlamaServerClient`](llm::llama::LlamaServerClient) (local, exact token
//!   counts) or [`OpenRouterClient`](llm::openrouter::OpenRouterClient)
//!   (cloud, generation only). Wrap a shared model in
//!   [`Serialized`](llm::serial::Serialized) to admit one call at a time.
//!
//! - **Retrieve context:** [`VectorSearch`](retrieval::VectorSearch) and
//!   the HTTP client [`HttpVectorSearch`](retrieval::HttpVectorSearch).
//!
//! - **Observe a run:** implement [`EventHandler`](events::EventHandler) or
//!   use [`LoggingHandler`](events::LoggingHandler).
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`budget`] | Content budgets, word/token estimation, prompt fit checks |
//! | [`chunk`] | Overlapping token-bounded chunking |
//! | [`outline`] | Partial and single-pass outlines, fusion, section splitting |
//! | [`notes`] | Section elaboration, context selection, document assembly |
//! | [`pipeline`] | Orchestration of the stages |
//! | [`llm`] | Model capabilities, adapters, retry, usage tracking |
//! | [`retrieval`] | Vector-search collaborator |
//! | [`store`] | Output persistence |
//! | [`prompts`] | Prompt templates |
//! | [`events`] | Pipeline events and handlers |

pub mod budget;
pub mod chunk;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod notes;
pub mod outline;
pub mod pipeline;
pub mod prelude;
pub mod prompts;
pub mod retrieval;
pub mod store;
pub mod transcript;

#[cfg(test)]
mod test_support;

pub use config::PipelineConfig;
pub use error::{LlmError, PipelineError, PipelineResult};
pub use pipeline::Pipeline;
pub use transcript::Transcript;
