//! Error taxonomy.
//!
//! [`PipelineError`] covers the fatal conditions that abort a pipeline
//! operation. Stage-local degradation (a dropped chunk, a truncated outline,
//! a section without notes) is never an error; it is recorded on the run
//! result and reported through events. [`LlmError`] is what the LLM and
//! HTTP collaborators return.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Fatal pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "content budget is not positive: {context_window} x {safety_factor} window \
         leaves no room after {prompt_overhead_tokens} prompt tokens and \
         {output_reserve_tokens} reserved output tokens"
    )]
    NonPositiveBudget {
        context_window: usize,
        safety_factor: f64,
        prompt_overhead_tokens: usize,
        output_reserve_tokens: usize,
    },

    #[error("transcript is empty")]
    EmptyTranscript,

    #[error("LLM capability unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("vector-search service unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("no partial outline could be generated")]
    NoPartialOutlines,

    #[error("outline fusion failed: {0}")]
    FusionFailed(String),

    #[error("no section produced notes")]
    NoSectionNotes,

    #[error("document notes generation failed: {0}")]
    DocumentNotesFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// HTTP status code for this error at the web boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::EmptyTranscript => 400,
            PipelineError::LlmUnavailable(_)
            | PipelineError::Llm(_)
            | PipelineError::RetrievalUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Whether the caller sent something unusable (as opposed to a server fault).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// Failures from the LLM adapters and other HTTP collaborators.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request(_) => true,
            LlmError::Http { status, .. } => crate::llm::retry::is_transient_status(*status),
            LlmError::Parse(_) | LlmError::Api(_) | LlmError::Unavailable(_) => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Request(e.to_string())
    }
}
