//! Turn a lecture transcript into an outline and study notes.
//!
//! Talks to a running llama.cpp server for local generation and, optionally,
//! to a vector-search service and OpenRouter.
//!
//! # Examples
//!
//! ```sh
//! # Outline only (saved under ./output)
//! notecraft outline lecture01.txt
//!
//! # Outline and notes in one go, 8k context model
//! notecraft --context-window 8192 run lecture01.txt --title "Cell biology"
//!
//! # Notes from a previously saved outline, grounded on vector search
//! notecraft --vector-url http://127.0.0.1:8000 --context vector \
//!   notes lecture01.txt --outline output/lecture01_outline_20250301-101500.txt
//!
//! # Whole-document notes from a cloud model (reads OPENROUTER_KEY)
//! notecraft notes lecture01.txt --outline outline.txt --cloud-model google/gemini-2.5-flash
//!
//! # Index the transcript in the vector store
//! notecraft --vector-url http://127.0.0.1:8000 populate lecture01.txt
//! ```

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use notecraft::config::{DEFAULT_CONTEXT_WINDOW, PipelineConfig};
use notecraft::error::{PipelineError, PipelineResult};
use notecraft::events::LoggingHandler;
use notecraft::llm::llama::{DEFAULT_LLAMA_URL, LlamaServerClient};
use notecraft::llm::openrouter::{DEFAULT_CLOUD_MODEL, OpenRouterClient};
use notecraft::notes::ContextSource;
use notecraft::outline::MasterOutline;
use notecraft::pipeline::Pipeline;
use notecraft::retrieval::HttpVectorSearch;
use notecraft::store::{DocumentStore, FsStore, output_file_name_now};
use notecraft::transcript::Transcript;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Turn a lecture transcript into an outline and study notes.
#[derive(Parser)]
#[command(name = "notecraft", version)]
struct Cli {
    // ── Services ───────────────────────────────────────────────
    /// llama.cpp server URL
    #[arg(long, env = "NOTECRAFT_LLM_URL", default_value = DEFAULT_LLAMA_URL)]
    llm_url: String,

    /// Vector-search service URL
    #[arg(long, env = "NOTECRAFT_VECTOR_URL")]
    vector_url: Option<String>,

    // ── Budgets ────────────────────────────────────────────────
    /// Context window of the local model, in tokens
    #[arg(long, default_value_t = DEFAULT_CONTEXT_WINDOW)]
    context_window: usize,

    /// Fraction of the context window to fill (0, 1]
    #[arg(long, default_value_t = 0.8)]
    safety_factor: f64,

    /// Tokens shared by consecutive chunks
    #[arg(long, default_value_t = 200)]
    overlap: usize,

    /// Estimate tokens from word counts instead of asking the server
    #[arg(long)]
    approximate: bool,

    /// Continuation calls allowed when an answer hits its output limit
    #[arg(long, default_value_t = 0)]
    max_continuations: u32,

    // ── Notes context ──────────────────────────────────────────
    /// Context for section notes
    #[arg(long, value_enum, default_value_t = ContextArg::Transcript)]
    context: ContextArg,

    /// Passages retrieved per vector-search query
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    // ── Output ─────────────────────────────────────────────────
    /// Directory for generated files
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the master outline of a transcript
    Outline { transcript: PathBuf },

    /// Generate notes from a transcript and an existing outline
    Notes {
        transcript: PathBuf,

        /// Outline file produced by `outline`
        #[arg(long)]
        outline: PathBuf,

        /// Document title (defaults to the transcript file name)
        #[arg(long)]
        title: Option<String>,

        /// Write whole-document notes with this OpenRouter model instead of the local one
        #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_CLOUD_MODEL)]
        cloud_model: Option<String>,

        /// Context window of the cloud model, in tokens
        #[arg(long, default_value_t = 1_000_000)]
        cloud_context_window: usize,
    },

    /// Generate the outline and then the notes
    Run {
        transcript: PathBuf,

        /// Document title (defaults to the transcript file name)
        #[arg(long)]
        title: Option<String>,
    },

    /// Send the transcript to the vector-search service
    Populate { transcript: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ContextArg {
    Vector,
    Transcript,
    None,
}

impl Cli {
    fn pipeline_config(&self, context_window: usize) -> PipelineConfig {
        let context_source = match self.context {
            ContextArg::Vector => ContextSource::VectorSearch { top_k: self.top_k },
            ContextArg::Transcript => ContextSource::Transcript,
            ContextArg::None => ContextSource::None,
        };
        PipelineConfig::new(context_window)
            .with_safety_factor(self.safety_factor)
            .with_overlap_tokens(self.overlap)
            .with_context_source(context_source)
            .with_max_continuations(self.max_continuations)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "notecraft=debug" } else { "notecraft=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn title_for(path: &Path, title: Option<&str>) -> String {
    match title {
        Some(t) => t.to_string(),
        None => path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Notes".to_string()),
    }
}

fn load_transcript(path: &Path) -> PipelineResult<Transcript> {
    let transcript = Transcript::from_file(path)?;
    eprintln!(
        "Transcript: {} ({} words)",
        path.display(),
        transcript.word_count()
    );
    Ok(transcript)
}

fn save(store: &FsStore, source: &Path, kind: &str, ext: &str, text: &str) -> PipelineResult<PathBuf> {
    let name = output_file_name_now(&source.to_string_lossy(), kind, ext);
    let path = store.save(&name, text)?;
    println!("{}", path.display());
    Ok(path)
}

async fn local_model(cli: &Cli) -> PipelineResult<LlamaServerClient> {
    let model = LlamaServerClient::new(&cli.llm_url)?;
    model
        .health()
        .await
        .map_err(|e| PipelineError::LlmUnavailable(e.to_string()))?;
    Ok(model)
}

async fn execute(cli: &Cli) -> PipelineResult<()> {
    let store = FsStore::new(&cli.output_dir)?;
    let search = cli.vector_url.as_deref().map(HttpVectorSearch::new);
    let handler = LoggingHandler;

    // Cloud notes need no local model.
    if let Command::Notes {
        transcript,
        outline,
        cloud_model: Some(cloud_model),
        cloud_context_window,
        ..
    } = &cli.command
    {
        let text = load_transcript(transcript)?;
        let outline = MasterOutline::from_text(std::fs::read_to_string(outline)?);
        let cloud = OpenRouterClient::from_env(cloud_model.as_str())?;
        let mut pipeline = Pipeline::new(&cloud, cli.pipeline_config(*cloud_context_window))
            .with_event_handler(&handler);
        if let Some(search) = &search {
            pipeline = pipeline.with_retriever(search);
        }
        let notes = pipeline.document_notes(&text, &outline).await?;
        save(&store, transcript, "notes_cloud", "md", &notes)?;
        eprintln!("{}", pipeline.usage().summary());
        return Ok(());
    }

    let model = local_model(cli).await?;
    let config = cli.pipeline_config(cli.context_window);
    let mut pipeline = if cli.approximate {
        Pipeline::new(&model, config)
    } else {
        Pipeline::for_model(&model, config)
    }
    .with_event_handler(&handler);
    if let Some(search) = &search {
        pipeline = pipeline.with_retriever(search);
    }

    match &cli.command {
        Command::Outline { transcript } => {
            let text = load_transcript(transcript)?;
            let run = pipeline.outline(&text).await?;
            if run.degraded() {
                eprintln!(
                    "Warning: outline is incomplete (dropped chunks: {:?})",
                    run.dropped_chunks
                );
            }
            save(&store, transcript, "outline", "txt", &run.outline.text)?;
        }
        Command::Notes {
            transcript,
            outline,
            title,
            ..
        } => {
            let text = load_transcript(transcript)?;
            let outline = MasterOutline::from_text(std::fs::read_to_string(outline)?);
            let title = title_for(transcript, title.as_deref());
            let run = pipeline.notes(&text, &outline, &title).await?;
            if run.degraded() {
                eprintln!(
                    "Warning: sections without notes: {:?}",
                    run.failed_sections()
                );
            }
            save(&store, transcript, "notes", "md", &run.document.render())?;
        }
        Command::Run { transcript, title } => {
            let text = load_transcript(transcript)?;
            let title = title_for(transcript, title.as_deref());
            let run = pipeline.run(&text, &title).await?;
            save(&store, transcript, "outline", "txt", &run.outline.outline.text)?;
            save(&store, transcript, "notes", "md", &run.notes.document.render())?;
        }
        Command::Populate { transcript } => {
            let text = load_transcript(transcript)?;
            if !pipeline.populate(&text).await? {
                return Err(PipelineError::RetrievalUnavailable(
                    "the vector store did not accept the transcript".into(),
                ));
            }
            eprintln!("Vector store populated");
        }
    }
    eprintln!("{}", pipeline.usage().summary());
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = execute(&cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
