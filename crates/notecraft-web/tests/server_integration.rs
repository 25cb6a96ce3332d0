//! Integration tests for the notecraft-web server.
//!
//! These tests start a real axum server on a random port, backed by an
//! in-memory model, and exercise the REST endpoints.

use std::sync::{Arc, Mutex};

use notecraft::config::PipelineConfig;
use notecraft::error::LlmError;
use notecraft::llm::{Generation, GenerationRequest, LlmFuture, TextGenerator, TokenId, Tokenizer};
use notecraft::notes::ContextSource;
use notecraft::retrieval::{SearchFuture, VectorSearch};
use notecraft::store::FsStore;
use notecraft_web::{AppState, WebConfig, spawn_web};

/// Word-level tokenizer with canned answers keyed on the prompt kind.
struct ScriptedModel {
    vocab: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new() -> Self {
        Self {
            vocab: Mutex::new(Vec::new()),
        }
    }
}

impl Tokenizer for ScriptedModel {
    fn tokenize<'a>(&'a self, text: &'a str) -> LlmFuture<'a, Vec<TokenId>> {
        Box::pin(async move {
            let mut vocab = self.vocab.lock().unwrap();
            Ok(text
                .split_whitespace()
                .map(|w| {
                    vocab.push(w.to_string());
                    (vocab.len() - 1) as TokenId
                })
                .collect())
        })
    }

    fn detokenize<'a>(&'a self, tokens: &'a [TokenId]) -> LlmFuture<'a, String> {
        Box::pin(async move {
            let vocab = self.vocab.lock().unwrap();
            let words: Vec<&str> = tokens
                .iter()
                .filter_map(|&t| vocab.get(t as usize).map(String::as_str))
                .collect();
            Ok(words.join(" "))
        })
    }
}

impl TextGenerator for ScriptedModel {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async move {
            let prompt = &request.prompt;
            let text = if let Some(rest) = prompt.split("OUTLINE SECTION TO DEVELOP:\n").nth(1) {
                let title = rest.lines().next().unwrap_or_default();
                let heading = title.split_once(' ').map(|(_, t)| t).unwrap_or(title);
                if heading == "Skipped" {
                    String::new()
                } else {
                    format!("## {heading}\n- explained")
                }
            } else {
                "1. Introduction\n2. Main topic".to_string()
            };
            Ok(Generation::stop(text))
        })
    }
}

/// A model whose server is down.
struct DownModel;

impl Tokenizer for DownModel {
    fn tokenize<'a>(&'a self, _text: &'a str) -> LlmFuture<'a, Vec<TokenId>> {
        Box::pin(async { Err(LlmError::Request("connection refused".into())) })
    }

    fn detokenize<'a>(&'a self, _tokens: &'a [TokenId]) -> LlmFuture<'a, String> {
        Box::pin(async { Err(LlmError::Request("connection refused".into())) })
    }
}

impl TextGenerator for DownModel {
    fn generate<'a>(&'a self, _request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async { Err(LlmError::Request("connection refused".into())) })
    }
}

/// Large-context generator that records the prompts it receives.
#[derive(Clone, Default)]
struct CloudModel {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl TextGenerator for CloudModel {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> LlmFuture<'a, Generation> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(Generation::stop(
                "## Introduction\n- from the cloud\n\n## Main topic\n- also from the cloud",
            ))
        })
    }
}

/// Vector search over fixed passages, recording its queries.
#[derive(Clone, Default)]
struct FixedSearch {
    queries: Arc<Mutex<Vec<String>>>,
}

impl VectorSearch for FixedSearch {
    fn populate<'a>(&'a self, _texts: &'a [String]) -> SearchFuture<'a, bool> {
        Box::pin(async { true })
    }

    fn search<'a>(&'a self, query: &'a str, _top_k: usize) -> SearchFuture<'a, Vec<String>> {
        Box::pin(async move {
            self.queries.lock().unwrap().push(query.to_string());
            vec!["Cells divide by mitosis.".to_string()]
        })
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::new(4096)
        .with_safety_factor(1.0)
        .with_outline_tokens(256, 1024, 1024)
        .with_notes_tokens(512)
        .with_document_notes_tokens(1024)
        .with_context_source(ContextSource::Transcript)
}

/// Helper: spawn a test server on port 0 (random available port).
async fn spawn_test_server(state: AppState) -> String {
    let web_config = WebConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        ..Default::default()
    };
    let addr = spawn_web(state, web_config).await.unwrap();
    format!("http://{addr}")
}

async fn scripted_server() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path()).unwrap();
    let base = spawn_test_server(AppState::new(ScriptedModel::new(), store, config())).await;
    (dir, base)
}

const TRANSCRIPT: &str = "Today we introduce the course and then cover the main topic in depth.";

// ── Outline ─────────────────────────────────────────────────────────

#[tokio::test]
async fn post_outline_returns_and_stores_outline() {
    let (_dir, base) = scripted_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/outline"))
        .json(&serde_json::json!({"filename": "lecture01.txt", "transcript": TRANSCRIPT}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["outline"], "1. Introduction\n2. Main topic");
    assert_eq!(json["degraded"], false);
    let file = json["file"].as_str().unwrap().to_string();
    assert!(file.starts_with("lecture01_outline_"));
    assert!(file.ends_with(".txt"));

    let listed: serde_json::Value = reqwest::get(format!("{base}/files"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["filenames"], serde_json::json!([file]));
    assert_eq!(json["warnings"], serde_json::json!([]));

    let body = reqwest::get(format!("{base}/files/{file}"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "1. Introduction\n2. Main topic");
}

#[tokio::test]
async fn post_outline_rejects_blank_transcript() {
    let (_dir, base) = scripted_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/outline"))
        .json(&serde_json::json!({"filename": "empty.txt", "transcript": "   \n"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn unreachable_model_is_503() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path()).unwrap();
    let base = spawn_test_server(AppState::new(DownModel, store, config())).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/outline"))
        .json(&serde_json::json!({"filename": "l.txt", "transcript": TRANSCRIPT}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

// ── Notes ───────────────────────────────────────────────────────────

#[tokio::test]
async fn post_notes_renders_document_and_reports_omissions() {
    let (_dir, base) = scripted_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/notes"))
        .json(&serde_json::json!({
            "filename": "lecture01.txt",
            "transcript": TRANSCRIPT,
            "outline": "1. Introduction\n2. Skipped\n3. Main topic",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(
        json["document"],
        "# lecture01\n\n## Introduction\n- explained\n\n## Main topic\n- explained\n"
    );
    assert_eq!(json["omitted_sections"], serde_json::json!([2]));
    assert_eq!(json["warnings"].as_array().unwrap().len(), 1);
    assert!(json["warnings"][0].as_str().unwrap().starts_with("section 2/3 omitted"));
    assert!(json["file"].as_str().unwrap().ends_with(".md"));
}

#[tokio::test]
async fn post_notes_rejects_blank_outline() {
    let (_dir, base) = scripted_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/notes"))
        .json(&serde_json::json!({
            "filename": "l.txt",
            "transcript": TRANSCRIPT,
            "outline": " ",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn cloud_notes_use_outline_passages() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path()).unwrap();
    let cloud = CloudModel::default();
    let search = FixedSearch::default();
    let state = AppState::new(ScriptedModel::new(), store, config())
        .with_cloud_model(cloud.clone(), 100_000)
        .with_retriever(search.clone());
    let base = spawn_test_server(state).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/notes/cloud"))
        .json(&serde_json::json!({
            "filename": "lecture01.txt",
            "transcript": TRANSCRIPT,
            "outline": "1. Introduction\n2. Main topic",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["document"].as_str().unwrap().contains("from the cloud"));
    let file = json["file"].as_str().unwrap();
    assert!(file.starts_with("lecture01_notes_cloud_"));
    assert!(file.ends_with(".md"));

    assert_eq!(
        *search.queries.lock().unwrap(),
        vec!["Introduction".to_string(), "Main topic".to_string()]
    );
    let prompts = cloud.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Cells divide by mitosis."));
    assert!(prompts[0].contains(TRANSCRIPT));
}

#[tokio::test]
async fn cloud_notes_without_cloud_model_is_503() {
    let (_dir, base) = scripted_server().await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{base}/notes/cloud"))
        .json(&serde_json::json!({
            "filename": "l.txt",
            "transcript": TRANSCRIPT,
            "outline": "1. Introduction",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}

// ── Files ───────────────────────────────────────────────────────────

#[tokio::test]
async fn get_file_rejects_traversal_and_reports_missing() {
    let (_dir, base) = scripted_server().await;

    let resp = reqwest::get(format!("{base}/files/..secret")).await.unwrap();
    assert_eq!(resp.status(), 400);

    let resp = reqwest::get(format!("{base}/files/missing.md")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn simultaneous_outlines_for_one_file_are_both_kept() {
    let (_dir, base) = scripted_server().await;

    let client = reqwest::Client::new();
    let post = || {
        client
            .post(format!("{base}/outline"))
            .json(&serde_json::json!({"filename": "same.txt", "transcript": TRANSCRIPT}))
            .send()
    };
    let (a, b) = tokio::join!(post(), post());
    let a: serde_json::Value = a.unwrap().json().await.unwrap();
    let b: serde_json::Value = b.unwrap().json().await.unwrap();
    assert_ne!(a["file"], b["file"]);

    let listed: serde_json::Value = reqwest::get(format!("{base}/files"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["filenames"].as_array().unwrap().len(), 2);
}
