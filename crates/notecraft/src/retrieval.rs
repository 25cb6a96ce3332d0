//! Vector-search collaborator.
//!
//! The pipeline only needs two capabilities from a retrieval service: store
//! transcript passages ([`VectorSearch::populate`]) and fetch the passages
//! most similar to a query ([`VectorSearch::search`]). Retrieval is an
//! enrichment, so both degrade instead of failing: an unreachable service
//! yields `false` or no passages, with a `warn!`.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::outline::parse::{ParsedOutline, parse_outline};

/// Boxed future returned by [`VectorSearch`] methods.
pub type SearchFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Similarity search over previously stored passages.
pub trait VectorSearch: Send + Sync {
    /// Store passages for later search. Returns whether the service accepted them.
    fn populate<'a>(&'a self, texts: &'a [String]) -> SearchFuture<'a, bool>;

    /// Up to `top_k` passages most similar to `query`, best first.
    fn search<'a>(&'a self, query: &'a str, top_k: usize) -> SearchFuture<'a, Vec<String>>;
}

// ── HTTP client ────────────────────────────────────────────────────

const POPULATE_TIMEOUT: Duration = Duration::from_secs(300);
const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct PopulateRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize, Default)]
struct PopulateResponse {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query_text: &'a str,
    n_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    documents: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    document: Option<String>,
}

/// JSON-over-HTTP client for a vector-search service exposing
/// `POST /populate` and `POST /search`.
pub struct HttpVectorSearch {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorSearch {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, path: &str, body: &B, timeout: Duration) -> Result<T, String>
    where
        B: Serialize + Sync,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let start = Instant::now();
        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("{url}: {e}"))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| format!("{url}: {e}"))?;
        debug!(
            "POST {url} -> {status} ({} bytes, {}ms)",
            text.len(),
            start.elapsed().as_millis()
        );
        if !status.is_success() {
            let preview: String = text.chars().take(200).collect();
            return Err(format!("{url}: HTTP {status}: {preview}"));
        }
        serde_json::from_str(&text).map_err(|e| format!("{url}: unexpected response: {e}"))
    }
}

impl VectorSearch for HttpVectorSearch {
    fn populate<'a>(&'a self, texts: &'a [String]) -> SearchFuture<'a, bool> {
        Box::pin(async move {
            if texts.is_empty() {
                warn!("No passages to send to the vector store");
                return false;
            }
            let body = PopulateRequest { texts };
            match self
                .post::<_, PopulateResponse>("populate", &body, POPULATE_TIMEOUT)
                .await
            {
                Ok(resp) if resp.status.as_deref() == Some("success") => {
                    debug!("Vector store accepted {} passages", texts.len());
                    true
                }
                Ok(resp) => {
                    warn!(
                        "Vector store did not confirm populate (status: {})",
                        resp.status.as_deref().unwrap_or("missing")
                    );
                    false
                }
                Err(e) => {
                    warn!("Vector store populate failed: {e}");
                    false
                }
            }
        })
    }

    fn search<'a>(&'a self, query: &'a str, top_k: usize) -> SearchFuture<'a, Vec<String>> {
        Box::pin(async move {
            if query.trim().is_empty() {
                return Vec::new();
            }
            let body = SearchRequest {
                query_text: query,
                n_results: top_k,
            };
            match self
                .post::<_, SearchResponse>("search", &body, SEARCH_TIMEOUT)
                .await
            {
                Ok(resp) => resp
                    .documents
                    .into_iter()
                    .filter_map(|hit| hit.document)
                    .collect(),
                Err(e) => {
                    warn!("Vector search failed: {e}");
                    Vec::new()
                }
            }
        })
    }
}

// ── Queries ────────────────────────────────────────────────────────

/// Search queries derived from an outline: the titles of its first
/// `max_terms` top-level entries. An outline that does not parse falls back
/// to its first non-blank lines.
pub fn query_terms(outline: &str, max_terms: usize) -> Vec<String> {
    match parse_outline(outline) {
        parsed @ ParsedOutline::Parsed(_) => parsed
            .top_level()
            .map(|item| item.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .take(max_terms)
            .collect(),
        ParsedOutline::Unparsed(text) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(max_terms)
            .map(str::to_string)
            .collect(),
    }
}

/// Search once per query and merge the hits in order, dropping duplicates.
pub async fn search_all(search: &dyn VectorSearch, queries: &[String], top_k: usize) -> Vec<String> {
    let mut passages: Vec<String> = Vec::new();
    for query in queries {
        for passage in search.search(query, top_k).await {
            if !passages.contains(&passage) {
                passages.push(passage);
            }
        }
    }
    passages
}

/// Format retrieved passages as one context block, or `None` if there are none.
pub fn format_passages(passages: &[String]) -> Option<String> {
    let kept: Vec<&str> = passages
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n\n---\n\n"))
    }
}

/// Context for whole-document notes: passages retrieved for the outline's
/// top-level titles.
pub async fn gather_outline_context(
    search: &dyn VectorSearch,
    outline: &str,
    max_terms: usize,
    top_k: usize,
) -> Option<String> {
    let queries = query_terms(outline, max_terms);
    if queries.is_empty() {
        return None;
    }
    debug!("Querying vector store with {} outline term(s)", queries.len());
    format_passages(&search_all(search, &queries, top_k).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticSearch;

    #[test]
    fn query_terms_use_top_level_titles() {
        let outline = "1. Photosynthesis\n1.1. Light reactions\n2. Respiration\n3. Fermentation";
        assert_eq!(
            query_terms(outline, 2),
            vec!["Photosynthesis".to_string(), "Respiration".to_string()]
        );
    }

    #[test]
    fn query_terms_fall_back_to_lines() {
        let terms = query_terms("Cells\n\nEnergy\nEnzymes", 2);
        assert_eq!(terms, vec!["Cells".to_string(), "Energy".to_string()]);
    }

    #[tokio::test]
    async fn search_all_deduplicates_in_order() {
        let search = StaticSearch::new(&["alpha", "beta"]);
        let queries = vec!["q1".to_string(), "q2".to_string()];
        let passages = search_all(&search, &queries, 2).await;
        assert_eq!(passages, vec!["alpha".to_string(), "beta".to_string()]);
        assert_eq!(search.queries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn outline_context_joins_passages() {
        let search = StaticSearch::new(&["alpha", "beta"]);
        let context = gather_outline_context(&search, "1. A\n2. B", 3, 1)
            .await
            .unwrap();
        assert_eq!(context, "alpha");
        let queries = search.queries.lock().unwrap();
        assert_eq!(queries[0], ("A".to_string(), 1));
    }

    #[test]
    fn blank_passages_are_no_context() {
        assert!(format_passages(&[" ".to_string()]).is_none());
        assert!(format_passages(&[]).is_none());
    }

    #[test]
    fn request_bodies_match_service_format() {
        let search = serde_json::to_value(SearchRequest {
            query_text: "mitosis",
            n_results: 3,
        })
        .unwrap();
        assert_eq!(search, serde_json::json!({"query_text": "mitosis", "n_results": 3}));

        let texts = vec!["a".to_string(), "b".to_string()];
        let populate = serde_json::to_value(PopulateRequest { texts: &texts }).unwrap();
        assert_eq!(populate, serde_json::json!({"texts": ["a", "b"]}));
    }

    #[test]
    fn search_response_reads_documents() {
        let resp: SearchResponse = serde_json::from_str(
            r#"{"documents":[{"document":"alpha","distance":0.1},{"distance":0.4},{"document":"beta"}]}"#,
        )
        .unwrap();
        let docs: Vec<String> = resp.documents.into_iter().filter_map(|h| h.document).collect();
        assert_eq!(docs, vec!["alpha".to_string(), "beta".to_string()]);

        let empty: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.documents.is_empty());
    }

    #[test]
    fn populate_response_status() {
        let ok: PopulateResponse = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(ok.status.as_deref(), Some("success"));
        let missing: PopulateResponse = serde_json::from_str(r#"{"count":3}"#).unwrap();
        assert!(missing.status.is_none());
    }

    // ── Against a local service ─────────────────────────────────────

    mod service {
        use std::sync::{Arc, Mutex};

        use axum::extract::State;
        use axum::http::StatusCode;
        use axum::routing::post;
        use axum::{Json, Router};
        use serde_json::{Value, json};

        use super::super::{HttpVectorSearch, VectorSearch};

        type Requests = Arc<Mutex<Vec<(&'static str, Value)>>>;

        async fn populate(State(requests): State<Requests>, Json(body): Json<Value>) -> Json<Value> {
            let reject = body["texts"]
                .as_array()
                .is_some_and(|texts| texts.iter().any(|t| t == "reject"));
            requests.lock().unwrap().push(("populate", body));
            Json(if reject {
                json!({"status": "error", "message": "bad batch"})
            } else {
                json!({"status": "success"})
            })
        }

        async fn search(
            State(requests): State<Requests>,
            Json(body): Json<Value>,
        ) -> Result<Json<Value>, StatusCode> {
            let fail = body["query_text"] == "boom";
            let k = body["n_results"].as_u64().unwrap_or(0) as usize;
            requests.lock().unwrap().push(("search", body));
            if fail {
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
            let documents: Vec<Value> = ["alpha", "beta", "gamma"]
                .into_iter()
                .take(k)
                .map(|d| json!({"document": d, "distance": 0.2}))
                .collect();
            Ok(Json(json!({"documents": documents})))
        }

        async fn spawn_service() -> (String, Requests) {
            let requests = Requests::default();
            let app = Router::new()
                .route("/populate", post(populate))
                .route("/search", post(search))
                .with_state(Arc::clone(&requests));
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{addr}/"), requests)
        }

        #[tokio::test]
        async fn search_sends_query_and_reads_documents() {
            let (url, requests) = spawn_service().await;
            let client = HttpVectorSearch::new(url);

            let passages = client.search("mitosis", 2).await;
            assert_eq!(passages, vec!["alpha".to_string(), "beta".to_string()]);

            let requests = requests.lock().unwrap();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].0, "search");
            assert_eq!(requests[0].1, json!({"query_text": "mitosis", "n_results": 2}));
        }

        #[tokio::test]
        async fn search_http_error_degrades_to_nothing() {
            let (url, _requests) = spawn_service().await;
            let client = HttpVectorSearch::new(url);
            assert!(client.search("boom", 3).await.is_empty());
        }

        #[tokio::test]
        async fn populate_requires_success_status() {
            let (url, requests) = spawn_service().await;
            let client = HttpVectorSearch::new(url);

            assert!(client.populate(&["one".to_string(), "two".to_string()]).await);
            assert!(!client.populate(&["reject".to_string()]).await);

            let requests = requests.lock().unwrap();
            assert_eq!(requests[0], ("populate", json!({"texts": ["one", "two"]})));
            assert_eq!(requests.len(), 2);
        }
    }

    #[tokio::test]
    async fn unreachable_service_degrades() {
        let search = HttpVectorSearch::new("http://127.0.0.1:9/");
        assert_eq!(search.base_url(), "http://127.0.0.1:9");
        assert!(search.search("query", 3).await.is_empty());
        assert!(!search.populate(&["text".to_string()]).await);
    }
}
