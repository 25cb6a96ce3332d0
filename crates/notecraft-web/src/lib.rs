//! HTTP boundary for the notecraft pipeline.
//!
//! `notecraft-web` exposes the outline and notes operations over a small
//! JSON API and serves the files they produce. It adds no behavior of its
//! own: every request builds a [`Pipeline`](notecraft::pipeline::Pipeline)
//! over one shared model and maps pipeline errors to status codes.
//!
//! # Quick start
//!
//! ```ignore
//! use notecraft::prelude::*;
//! use notecraft_web::{AppState, WebConfig, spawn_web};
//!
//! let model = LlamaServerClient::new(DEFAULT_LLAMA_URL)?;
//! let store = FsStore::new("output")?;
//! let state = AppState::new(model, store, PipelineConfig::new(8192));
//!
//! let addr = spawn_web(state, WebConfig::default()).await?;
//! println!("API: http://{addr}");
//! ```
//!
//! # Endpoints
//!
//! | Route | Body | Response |
//! |-------|------|----------|
//! | `POST /outline` | `{"filename","transcript"}` | `{"file","outline","degraded","warnings"}` |
//! | `POST /notes` | `{"filename","transcript","outline","title"?}` | `{"file","document","omitted_sections","warnings"}` |
//! | `POST /notes/cloud` | `{"filename","transcript","outline"}` | `{"file","document","warnings"}` |
//! | `GET /files` | | `{"filenames": [...]}` |
//! | `GET /files/{name}` | | file content |
//!
//! Errors come back as `{"error": "..."}`: 400 for blank or malformed input,
//! 404 for a missing file, 503 when the model (or, for `/notes/cloud`, a
//! configured cloud model) is unavailable, 500 otherwise. Outputs are never
//! overwritten: a second output with the same name gets a `-2` suffix, and
//! `file` always names what was actually stored.

mod api;
mod server;

pub use api::{AppState, CloudNotesResponse, FileList, NotesResponse, OutlineResponse};

use std::net::SocketAddr;
use std::sync::Arc;

use notecraft::config::PipelineConfig;
use notecraft::llm::{LanguageModel, TextGenerator};
use notecraft::llm::serial::Serialized;
use notecraft::retrieval::VectorSearch;
use notecraft::store::DocumentStore;

/// Configuration for the web server.
pub struct WebConfig {
    /// Address to bind to. Default: `127.0.0.1:3001`.
    pub bind_addr: SocketAddr,
    /// Largest accepted request body. Default: 32 MiB.
    pub max_body_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl AppState {
    /// State over `model`, wrapped so concurrent requests never overlap
    /// inference calls.
    pub fn new(
        model: impl LanguageModel + 'static,
        store: impl DocumentStore + 'static,
        pipeline: PipelineConfig,
    ) -> Self {
        Self {
            model: Arc::new(Serialized::new(model)),
            cloud: None,
            cloud_context_window: 0,
            retriever: None,
            store: Arc::new(store),
            pipeline,
            exact_tokens: true,
        }
    }

    /// Serve `POST /notes/cloud` with `generator`, a model whose context
    /// window is `context_window` tokens.
    pub fn with_cloud_model(
        mut self,
        generator: impl TextGenerator + 'static,
        context_window: usize,
    ) -> Self {
        self.cloud = Some(Arc::new(generator));
        self.cloud_context_window = context_window;
        self
    }

    pub fn with_retriever(mut self, retriever: impl VectorSearch + 'static) -> Self {
        self.retriever = Some(Arc::new(retriever));
        self
    }

    /// Estimate tokens from word counts instead of calling the tokenizer.
    pub fn with_approximate_tokens(mut self) -> Self {
        self.exact_tokens = false;
        self
    }
}

/// Spawn the web server on a Tokio task and return the bound address.
///
/// The server runs until the Tokio runtime shuts down.
pub async fn spawn_web(state: AppState, config: WebConfig) -> std::io::Result<SocketAddr> {
    let router = server::build_router(state, config.max_body_bytes);
    server::start_server(router, config.bind_addr).await
}
