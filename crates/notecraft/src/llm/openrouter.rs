//! Adapter for the OpenRouter chat completions API.
//!
//! Cloud models are reached through a chat endpoint and expose no tokenizer,
//! so [`OpenRouterClient`] implements only [`TextGenerator`]. A pipeline
//! built on it budgets with the word heuristic. Its main use is whole-document
//! notes ([`crate::notes::elaborate_document`]) where a large context window
//! makes per-section elaboration unnecessary.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::retry::{RetryConfig, retry_call};
use super::{FinishReason, Generation, GenerationRequest, LlmFuture, TextGenerator, TokenUsage};
use crate::error::LlmError;

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default cloud model for whole-document notes.
pub const DEFAULT_CLOUD_MODEL: &str = "google/gemini-2.5-flash";

// ── Request types ──────────────────────────────────────────────────

/// Role of a chat message.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A chat message.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Chat completion request body. Unset optional fields are omitted.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Deserialize, Debug, Clone)]
struct UsageInfo {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_prompt: Option<String>,
    retry: RetryConfig,
}

impl OpenRouterClient {
    /// Create a client for `model` with the given API key.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .user_agent("notecraft/0.1")
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: None,
            retry: RetryConfig::default(),
        })
    }

    /// Read the API key from the `OPENROUTER_KEY` environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENROUTER_KEY")
            .map_err(|_| LlmError::Unavailable("OPENROUTER_KEY not set".into()))?;
        Self::new(api_key, model)
    }

    /// Send a system message ahead of every prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_request(&self, request: &GenerationRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: (!request.stop.is_empty()).then(|| request.stop.clone()),
        }
    }

    async fn chat_once(&self, body: &ChatRequest) -> Result<Generation, LlmError> {
        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "notecraft")
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Request(format!("failed to read response: {e}")))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        parse_chat_response(&text)
    }
}

fn parse_chat_response(text: &str) -> Result<Generation, LlmError> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| LlmError::Parse(e.to_string()))?;

    if let Some(err) = parsed.error {
        return Err(LlmError::Api(err.message));
    }

    let usage = parsed.usage.map_or(TokenUsage::default(), |u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
    });

    match parsed.choices.and_then(|c| c.into_iter().next()) {
        Some(choice) => Ok(Generation {
            text: choice.message.content.unwrap_or_default(),
            finish_reason: FinishReason::from_raw(choice.finish_reason.as_deref()),
            usage,
        }),
        None => {
            debug!("LLM output: empty (no choices)");
            Ok(Generation {
                text: String::new(),
                finish_reason: FinishReason::Stop,
                usage,
            })
        }
    }
}

impl TextGenerator for OpenRouterClient {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async move {
            let body = self.chat_request(request);
            debug!(
                "LLM request: model={}, max_tokens={}, temp={}",
                body.model, body.max_tokens, body.temperature,
            );
            trace!(
                "Request payload size: {} bytes",
                serde_json::to_string(&body).map_or(0, |s| s.len())
            );
            retry_call(&self.retry, "openrouter", || self.chat_once(&body)).await
        })
    }
}
