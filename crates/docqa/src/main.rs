//! # docqa CLI
//!
//! Command-line interface for the document Q&A pipeline. All commands
//! read a TOML configuration file (`--config`, defaulting to
//! `./config/docqa.toml`) and operate on the corpus snapshot it points
//! at, if any.
//!
//! ```bash
//! docqa ingest ./docs
//! docqa ask "How does checkpointing work?"
//! docqa summarize <document-id>
//! docqa stats
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::commands;
use docqa::config::{self, PersistMode};
use docqa::pipeline::Pipeline;

/// docqa — retrieval-augmented question answering over local documents.
///
/// Documents are chunked, embedded, and indexed in memory; questions
/// retrieve the most relevant fragments and feed them to a generation
/// model. State persists across runs via a JSON snapshot when
/// `[persistence].path` is configured.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Retrieval-augmented question answering over local documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents from files or directories.
    ///
    /// Accepts `.txt` and `.md` files. Directories contribute their
    /// top-level supported files. Each file becomes one document;
    /// re-ingesting a file creates a new document with a fresh id.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a question against the indexed corpus.
    ///
    /// Retrieves the most relevant fragments, assembles them into a
    /// bounded context, and generates an answer that cites its sources.
    Ask {
        /// The question to answer.
        question: String,

        /// Number of fragments to retrieve (overrides config).
        #[arg(long)]
        k: Option<i64>,

        /// Context budget in characters (overrides config).
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Summarize one or more documents by id.
    Summarize {
        /// Document ids to summarize.
        #[arg(required = true)]
        ids: Vec<String>,

        /// Context budget in characters (overrides config).
        #[arg(long)]
        budget: Option<usize>,
    },

    /// Delete a document and its index entries.
    Delete {
        /// Document id.
        id: String,
    },

    /// Show corpus and cache statistics.
    Stats,

    /// Write the corpus snapshot to disk now.
    Flush,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let write_back = cfg.persistence.mode == PersistMode::WriteBack;
    let pipeline = Pipeline::from_config(cfg)?;

    let mutating = matches!(cli.command, Commands::Ingest { .. } | Commands::Delete { .. });
    match cli.command {
        Commands::Ingest { paths } => {
            commands::run_ingest(&pipeline, &paths).await?;
        }
        Commands::Ask {
            question,
            k,
            budget,
        } => {
            commands::run_ask(&pipeline, &question, k, budget).await?;
        }
        Commands::Summarize { ids, budget } => {
            commands::run_summarize(&pipeline, &ids, budget).await?;
        }
        Commands::Delete { id } => {
            commands::run_delete(&pipeline, &id).await?;
        }
        Commands::Stats => {
            commands::run_stats(&pipeline)?;
        }
        Commands::Flush => {
            commands::run_flush(&pipeline)?;
        }
    }

    // Write-back mode defers snapshots to process exit.
    if write_back && mutating && pipeline.is_dirty() {
        pipeline.flush()?;
    }

    Ok(())
}
