//! notecraft HTTP server.
//!
//! Serves the outline and notes pipeline over a local llama.cpp server.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p notecraft-web
//! cargo run -p notecraft-web -- --port 8080 --context-window 8192
//! NOTECRAFT_VECTOR_URL=http://127.0.0.1:8000 cargo run -p notecraft-web -- --context vector
//! ```
//!
//! ```bash
//! curl -s localhost:3001/outline -H 'content-type: application/json' \
//!   -d '{"filename":"lecture01.txt","transcript":"..."}'
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use notecraft::config::{DEFAULT_CONTEXT_WINDOW, PipelineConfig};
use notecraft::llm::llama::{DEFAULT_LLAMA_URL, LlamaServerClient};
use notecraft::llm::openrouter::{DEFAULT_CLOUD_MODEL, OpenRouterClient};
use notecraft::notes::ContextSource;
use notecraft::retrieval::HttpVectorSearch;
use notecraft::store::FsStore;
use notecraft_web::{AppState, WebConfig, spawn_web};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// notecraft HTTP server.
#[derive(Parser)]
#[command(about = "HTTP API for transcript outlines and notes")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// llama.cpp server URL.
    #[arg(long, env = "NOTECRAFT_LLM_URL", default_value = DEFAULT_LLAMA_URL)]
    llm_url: String,

    /// Vector-search service URL.
    #[arg(long, env = "NOTECRAFT_VECTOR_URL")]
    vector_url: Option<String>,

    /// Context window of the model, in tokens.
    #[arg(long, default_value_t = DEFAULT_CONTEXT_WINDOW)]
    context_window: usize,

    /// Fraction of the context window to fill.
    #[arg(long, default_value_t = 0.8)]
    safety_factor: f64,

    /// Context for section notes.
    #[arg(long, value_enum, default_value_t = ContextArg::Transcript)]
    context: ContextArg,

    /// Passages retrieved per vector-search query.
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    /// Estimate tokens from word counts instead of asking the server.
    #[arg(long)]
    approximate: bool,

    /// OpenRouter model for `POST /notes/cloud`; needs `OPENROUTER_KEY`.
    #[arg(long, env = "NOTECRAFT_CLOUD_MODEL", num_args = 0..=1, default_missing_value = DEFAULT_CLOUD_MODEL)]
    cloud_model: Option<String>,

    /// Context window of the cloud model, in tokens.
    #[arg(long, default_value_t = 1_000_000)]
    cloud_context_window: usize,

    /// Directory for generated files.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Vector,
    Transcript,
    None,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    let model = LlamaServerClient::new(&args.llm_url).map_err(|e| e.to_string())?;
    if let Err(e) = model.health().await {
        warn!("LLM server not ready yet ({e}); requests will fail until it is");
    }

    let context_source = match args.context {
        ContextArg::Vector => ContextSource::VectorSearch { top_k: args.top_k },
        ContextArg::Transcript => ContextSource::Transcript,
        ContextArg::None => ContextSource::None,
    };
    let config = PipelineConfig::new(args.context_window)
        .with_safety_factor(args.safety_factor)
        .with_context_source(context_source);
    config.validate().map_err(|e| e.to_string())?;

    let store = FsStore::new(&args.output_dir)
        .map_err(|e| format!("cannot use {}: {e}", args.output_dir.display()))?;
    let mut state = AppState::new(model, store, config);
    if let Some(url) = &args.vector_url {
        state = state.with_retriever(HttpVectorSearch::new(url));
    }
    if let Some(cloud_model) = &args.cloud_model {
        let cloud = OpenRouterClient::from_env(cloud_model.as_str()).map_err(|e| e.to_string())?;
        info!("Cloud notes enabled with {cloud_model}");
        state = state.with_cloud_model(cloud, args.cloud_context_window);
    }
    if args.approximate {
        state = state.with_approximate_tokens();
    }

    let web_config = WebConfig {
        bind_addr: ([127, 0, 0, 1], args.port).into(),
        ..Default::default()
    };
    let addr = spawn_web(state, web_config)
        .await
        .map_err(|e| format!("failed to bind port {}: {e}", args.port))?;
    info!("Listening on http://{addr}");

    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    info!("Shutting down");
    Ok(())
}
