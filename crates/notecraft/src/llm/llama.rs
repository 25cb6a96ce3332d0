//! Adapter for a running llama.cpp HTTP server.
//!
//! Implements both [`Tokenizer`] and [`TextGenerator`] against the server's
//! native endpoints (`/tokenize`, `/detokenize`, `/completion`), so a local
//! model gives the pipeline exact token counts. The server owns the weights;
//! this client never loads a model.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::retry::{RetryConfig, retry_call};
use super::{
    FinishReason, Generation, GenerationRequest, LlmFuture, TextGenerator, TokenId, TokenUsage,
    Tokenizer,
};
use crate::error::LlmError;

/// Default server address (llama.cpp's own default).
pub const DEFAULT_LLAMA_URL: &str = "http://127.0.0.1:8080";

/// Local generation of a long outline can take minutes on CPU.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
struct TokenizeRequest<'a> {
    content: &'a str,
    add_special: bool,
}

#[derive(Deserialize, Debug)]
struct TokenizeResponse {
    tokens: Vec<TokenId>,
}

#[derive(Serialize, Debug)]
struct DetokenizeRequest<'a> {
    tokens: &'a [TokenId],
}

#[derive(Deserialize, Debug)]
struct DetokenizeResponse {
    content: String,
}

#[derive(Serialize, Debug)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "is_empty_slice")]
    stop: &'a [String],
    cache_prompt: bool,
}

fn is_empty_slice(v: &&[String]) -> bool {
    v.is_empty()
}

#[derive(Deserialize, Debug)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    stop_type: Option<String>,
    #[serde(default)]
    stopped_limit: bool,
    #[serde(default)]
    tokens_predicted: Option<u32>,
    #[serde(default)]
    tokens_evaluated: Option<u32>,
}

impl CompletionResponse {
    fn finish_reason(&self) -> FinishReason {
        if self.stopped_limit {
            return FinishReason::Length;
        }
        FinishReason::from_raw(self.stop_type.as_deref())
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for a llama.cpp server.
pub struct LlamaServerClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl LlamaServerClient {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .user_agent("notecraft/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy for transient failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the server is up and has a model loaded.
    pub async fn health(&self) -> Result<(), LlmError> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(format!("{url}: {e}")))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(LlmError::Unavailable(format!("{url}: HTTP {status}: {body}")))
        }
    }

    async fn post_once<B, T>(&self, path: &str, body: &B) -> Result<T, LlmError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let resp = self.client.post(&url).json(body).send().await?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Request(format!("failed to read response: {e}")))?;
        trace!("{url}: HTTP {status}, {} bytes", text.len());

        if !status.is_success() {
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        serde_json::from_str(&text).map_err(|e| LlmError::Parse(format!("{path}: {e}")))
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, LlmError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        retry_call(&self.retry, path, || self.post_once(path, body)).await
    }
}

impl Tokenizer for LlamaServerClient {
    fn tokenize<'a>(&'a self, text: &'a str) -> LlmFuture<'a, Vec<TokenId>> {
        Box::pin(async move {
            let body = TokenizeRequest {
                content: text,
                add_special: false,
            };
            let resp: TokenizeResponse = self.post_json("tokenize", &body).await?;
            Ok(resp.tokens)
        })
    }

    fn detokenize<'a>(&'a self, tokens: &'a [TokenId]) -> LlmFuture<'a, String> {
        Box::pin(async move {
            let body = DetokenizeRequest { tokens };
            let resp: DetokenizeResponse = self.post_json("detokenize", &body).await?;
            Ok(resp.content)
        })
    }
}

impl TextGenerator for LlamaServerClient {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async move {
            debug!(
                "LLM request: prompt={} bytes, n_predict={}, temp={}",
                request.prompt.len(),
                request.max_tokens,
                request.temperature,
            );
            let body = CompletionRequest {
                prompt: &request.prompt,
                n_predict: request.max_tokens,
                temperature: request.temperature,
                stop: &request.stop,
                cache_prompt: true,
            };
            let start = Instant::now();
            let resp: CompletionResponse = self.post_json("completion", &body).await?;
            let finish_reason = resp.finish_reason();
            debug!(
                "LLM response in {:.1}s: {} chars, finish={:?}",
                start.elapsed().as_secs_f64(),
                resp.content.len(),
                finish_reason,
            );
            Ok(Generation {
                text: resp.content,
                finish_reason,
                usage: TokenUsage {
                    prompt_tokens: resp.tokens_evaluated,
                    completion_tokens: resp.tokens_predicted,
                },
            })
        })
    }
}
