//! REST endpoint handlers.
//!
//! Handlers only marshal: they build a [`Pipeline`] over the shared model,
//! run one operation, store the result and map [`PipelineError`] to a status
//! code via [`PipelineError::status_code`]. Degradation reported by the
//! pipeline's events comes back in the response's `warnings`.

use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use notecraft::config::PipelineConfig;
use notecraft::error::{PipelineError, PipelineResult};
use notecraft::events::{CompositeEventHandler, EventHandler, LoggingHandler, PipelineEvent};
use notecraft::llm::{LanguageModel, TextGenerator};
use notecraft::notes::ContextSource;
use notecraft::outline::MasterOutline;
use notecraft::pipeline::Pipeline;
use notecraft::retrieval::VectorSearch;
use notecraft::store::{DocumentStore, output_file_name_now, validate_name};
use notecraft::transcript::Transcript;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Passages per query for cloud notes when the server is not otherwise
/// configured for vector-search context.
const CLOUD_TOP_K: usize = 3;

/// Shared application state passed to all handlers via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// The model, already wrapped so that one inference call runs at a time.
    pub model: Arc<dyn LanguageModel>,
    /// Large-context generator for whole-document notes.
    pub cloud: Option<Arc<dyn TextGenerator>>,
    pub cloud_context_window: usize,
    pub retriever: Option<Arc<dyn VectorSearch>>,
    pub store: Arc<dyn DocumentStore>,
    pub pipeline: PipelineConfig,
    /// Count tokens with the model's tokenizer rather than from words.
    pub exact_tokens: bool,
}

impl AppState {
    fn pipeline<'a>(&'a self, events: &'a dyn EventHandler) -> Pipeline<'a> {
        let pipeline = if self.exact_tokens {
            Pipeline::for_model(self.model.as_ref(), self.pipeline.clone())
        } else {
            Pipeline::new(self.model.as_ref(), self.pipeline.clone())
        };
        self.attach(pipeline, events)
    }

    fn cloud_pipeline<'a>(&'a self, events: &'a dyn EventHandler) -> PipelineResult<Pipeline<'a>> {
        let Some(cloud) = &self.cloud else {
            return Err(PipelineError::LlmUnavailable(
                "no cloud model is configured".into(),
            ));
        };
        let mut config = self.pipeline.clone();
        config.context_window = self.cloud_context_window;
        if self.retriever.is_some()
            && !matches!(config.context_source, ContextSource::VectorSearch { .. })
        {
            config.context_source = ContextSource::VectorSearch { top_k: CLOUD_TOP_K };
        }
        Ok(self.attach(Pipeline::new(cloud.as_ref(), config), events))
    }

    fn attach<'a>(&'a self, mut pipeline: Pipeline<'a>, events: &'a dyn EventHandler) -> Pipeline<'a> {
        pipeline = pipeline.with_event_handler(events);
        if let Some(retriever) = &self.retriever {
            pipeline = pipeline.with_retriever(retriever.as_ref());
        }
        pipeline
    }

    /// Save on the blocking pool; returns the stored name, which carries a
    /// suffix if `name` was already taken.
    async fn store_output(&self, name: String, text: String) -> Result<String, ApiError> {
        let store = Arc::clone(&self.store);
        let fallback = name.clone();
        let path = blocking(move || store.save(&name, &text)).await?;
        Ok(path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(fallback))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> PipelineResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => Ok(result?),
        Err(e) => Err(PipelineError::Io(std::io::Error::other(e)).into()),
    }
}

// ── Warnings ───────────────────────────────────────────────────────

/// Collects the degradation events of one request.
#[derive(Clone, Default)]
struct WarningLog(Arc<Mutex<Vec<String>>>);

impl WarningLog {
    /// Logging plus collection, in that order.
    fn observer(&self) -> CompositeEventHandler {
        CompositeEventHandler::new()
            .with(LoggingHandler)
            .with(self.clone())
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventHandler for WarningLog {
    fn on_event(&self, event: &PipelineEvent<'_>) {
        let message = match event {
            PipelineEvent::ChunkDropped {
                number,
                total,
                reason,
            } => format!("chunk {number}/{total} left out: {reason}"),
            PipelineEvent::Truncated { stage, label } => {
                format!("{stage} output hit the length limit ({label})")
            }
            PipelineEvent::UnusualFinish { label, reason } => {
                format!("{label} stopped with finish reason '{reason}'")
            }
            PipelineEvent::PromptExceedsWindow {
                stage,
                prompt_tokens,
                output_tokens,
                context_window,
            } => format!(
                "{stage} prompt ({prompt_tokens} tokens) plus {output_tokens} output tokens \
                 exceeds the {context_window}-token window"
            ),
            PipelineEvent::SectionFailed {
                ordinal,
                total,
                reason,
            } => format!("section {ordinal}/{total} omitted: {reason}"),
            _ => return,
        };
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message);
    }
}

// ── Errors ─────────────────────────────────────────────────────────

/// Handler error rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    NotFound(String),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Pipeline(e) => {
                let status = StatusCode::from_u16(e.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    warn!("Request failed: {e}");
                }
                (status, e.to_string())
            }
            ApiError::NotFound(name) => (StatusCode::NOT_FOUND, format!("file not found: {name}")),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ── Outline ────────────────────────────────────────────────────────

/// Request body for POST /outline.
#[derive(Deserialize)]
pub struct OutlineRequest {
    /// Name of the uploaded transcript; used to name the output file.
    pub filename: String,
    pub transcript: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OutlineResponse {
    /// Stored file name.
    pub file: String,
    pub outline: String,
    /// Whether chunks were dropped or output was truncated.
    pub degraded: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// POST /outline: Generate and store the master outline of a transcript.
pub async fn post_outline(
    State(app): State<AppState>,
    Json(body): Json<OutlineRequest>,
) -> Result<Json<OutlineResponse>, ApiError> {
    info!("Outline requested for {}", body.filename);
    let transcript = Transcript::new(body.transcript);
    let log = WarningLog::default();
    let events = log.observer();
    let run = app.pipeline(&events).outline(&transcript).await?;

    let name = output_file_name_now(&body.filename, "outline", "txt");
    let file = app.store_output(name, run.outline.text.clone()).await?;
    Ok(Json(OutlineResponse {
        file,
        degraded: run.degraded(),
        outline: run.outline.text,
        warnings: log.take(),
    }))
}

// ── Notes ──────────────────────────────────────────────────────────

/// Request body for POST /notes and POST /notes/cloud.
#[derive(Deserialize)]
pub struct NotesRequest {
    pub filename: String,
    pub transcript: String,
    pub outline: String,
    /// Document title; defaults to the transcript file name.
    #[serde(default)]
    pub title: Option<String>,
}

impl NotesRequest {
    fn outline(&self) -> Result<MasterOutline, ApiError> {
        if self.outline.trim().is_empty() {
            return Err(PipelineError::InvalidInput("outline is empty".into()).into());
        }
        Ok(MasterOutline::from_text(self.outline.clone()))
    }

    fn title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            std::path::Path::new(&self.filename)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Notes".to_string())
        })
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct NotesResponse {
    pub file: String,
    pub document: String,
    pub omitted_sections: Vec<usize>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// POST /notes: Elaborate an outline into a stored Markdown document.
pub async fn post_notes(
    State(app): State<AppState>,
    Json(body): Json<NotesRequest>,
) -> Result<Json<NotesResponse>, ApiError> {
    info!("Notes requested for {}", body.filename);
    let outline = body.outline()?;
    let title = body.title();
    let transcript = Transcript::new(body.transcript);
    let log = WarningLog::default();
    let events = log.observer();
    let run = app
        .pipeline(&events)
        .notes(&transcript, &outline, &title)
        .await?;

    let document = run.document.render();
    let name = output_file_name_now(&body.filename, "notes", "md");
    let file = app.store_output(name, document.clone()).await?;
    Ok(Json(NotesResponse {
        file,
        document,
        omitted_sections: run.document.omitted,
        warnings: log.take(),
    }))
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CloudNotesResponse {
    pub file: String,
    pub document: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// POST /notes/cloud: Whole-document notes from the cloud model in one call,
/// with passages retrieved for the outline's top-level titles when a
/// vector-search service is attached.
///
/// 503 if no cloud model is configured.
pub async fn post_cloud_notes(
    State(app): State<AppState>,
    Json(body): Json<NotesRequest>,
) -> Result<Json<CloudNotesResponse>, ApiError> {
    info!("Cloud notes requested for {}", body.filename);
    let outline = body.outline()?;
    let transcript = Transcript::new(body.transcript);
    let log = WarningLog::default();
    let events = log.observer();
    let document = app
        .cloud_pipeline(&events)?
        .document_notes(&transcript, &outline)
        .await?;

    let name = output_file_name_now(&body.filename, "notes_cloud", "md");
    let file = app.store_output(name, document.clone()).await?;
    Ok(Json(CloudNotesResponse {
        file,
        document,
        warnings: log.take(),
    }))
}

// ── Files ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug)]
pub struct FileList {
    pub filenames: Vec<String>,
}

/// GET /files: Names of all stored outputs.
pub async fn list_files(State(app): State<AppState>) -> Result<Json<FileList>, ApiError> {
    let store = Arc::clone(&app.store);
    let filenames = blocking(move || store.list()).await?;
    Ok(Json(FileList { filenames }))
}

/// GET /files/{name}: A stored output's content.
///
/// 400 for names with path separators, 404 if missing.
pub async fn get_file(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<String, ApiError> {
    validate_name(&name)?;
    let store = Arc::clone(&app.store);
    let lookup = name.clone();
    match blocking(move || store.load(&lookup)).await? {
        Some(text) => Ok(text),
        None => Err(ApiError::NotFound(name)),
    }
}
