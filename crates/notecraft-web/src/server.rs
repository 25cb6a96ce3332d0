//! Axum server setup and router construction.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::error;

use crate::api::{self, AppState};

/// Build the full axum router.
///
/// - `POST /outline`, `POST /notes`, `POST /notes/cloud` run the pipeline
/// - `GET /files`, `GET /files/{name}` serve stored outputs
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/outline", post(api::post_outline))
        .route("/notes", post(api::post_notes))
        .route("/notes/cloud", post(api::post_cloud_notes))
        .route("/files", get(api::list_files))
        .route("/files/{name}", get(api::get_file))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
}

/// Bind, start serving on a Tokio task, and return the bound address.
pub async fn start_server(router: Router, bind_addr: SocketAddr) -> std::io::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Server stopped: {e}");
        }
    });

    Ok(addr)
}
