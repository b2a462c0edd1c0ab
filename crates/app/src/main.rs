mod error;
mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use fallback_rag_core::{
    load_dataset_best_effort, AppConfig, CharacterNgramEmbedder, DocumentStore, Orchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "fallback-rag",
    version,
    about = "Answers from a local dataset, falling back to web search."
)]
struct Cli {
    /// TOML config file (defaults to ./fallback-rag.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dataset file or folder, overriding the configured path
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Index the dataset and serve the chat API.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Answer one question and exit.
    Ask {
        #[arg(long)]
        query: String,
        /// Print the full response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Load and index the dataset, then print index stats.
    Index,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dataset) = cli.dataset {
        config.dataset.path = dataset;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        dataset = %config.dataset.path.display(),
        "fallback-rag boot"
    );

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let orchestrator = build_orchestrator(&config)?;
            server::serve(&config, orchestrator).await?;
        }
        Command::Ask { query, json } => {
            let orchestrator = build_orchestrator(&config)?;
            let report = orchestrator.run(&query).await;
            let answer = report.outcome.context("answering query")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.text);
                println!("source: {}", answer.source);
                for citation in answer.evidence.citations() {
                    println!("  - {citation}");
                }
                if let Some(degradation) = &answer.degraded {
                    println!("degraded: {} ({})", degradation.kind, degradation.reason);
                }
            }
        }
        Command::Index => {
            let store = index_dataset(&config)?;
            if let Some(stats) = store.stats() {
                println!("{}", serde_json::to_string_pretty(stats)?);
            }
        }
    }

    Ok(())
}

fn index_dataset(config: &AppConfig) -> anyhow::Result<DocumentStore> {
    let path = &config.dataset.path;
    let report = load_dataset_best_effort(path, config.dataset.chunking)
        .with_context(|| format!("loading dataset from {}", path.display()))?;

    if !report.skipped_files.is_empty() {
        warn!(skipped = report.skipped_files.len(), "some dataset files were skipped");
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped dataset file");
        }
    }

    let embedder = CharacterNgramEmbedder::new(config.retrieval.embedding_dimensions);
    let mut store = DocumentStore::new(Arc::new(embedder));
    store.index(&report.dataset);
    Ok(store)
}

fn build_orchestrator(config: &AppConfig) -> anyhow::Result<Arc<Orchestrator>> {
    let store = index_dataset(config)?;
    let orchestrator =
        Orchestrator::from_config(Arc::new(store), config).context("configuring pipeline")?;
    Ok(Arc::new(orchestrator))
}
