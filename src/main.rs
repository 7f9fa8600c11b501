//! # logsift CLI
//!
//! The `logsift` binary chunks raw logs, embeds and indexes the chunks, and
//! answers natural-language questions with severity-ranked error patterns.
//!
//! ## Usage
//!
//! ```bash
//! logsift --config ./config/logsift.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `logsift ingest [folder]` | Chunk log files into `chunks.jsonl` |
//! | `logsift vectorize` | Embed chunks (cached), write a snapshot, build the index |
//! | `logsift query "<text>"` | Retrieve chunks and rank error clusters (JSON on stdout) |
//! | `logsift stats` | Show chunk, snapshot, index and cache status |
//! | `logsift cache clear` | Drop every cached embedding |
//!
//! ## Examples
//!
//! ```bash
//! logsift ingest ./logs --chunk-size 4096 --overlap 1024
//! logsift vectorize --progress human
//! logsift query "summarize all errors"
//! ```
//!
//! Logs go to stderr (`RUST_LOG` or `--verbose`); command output goes to stdout.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use logsift::config::{self, Config};
use logsift::embedding::create_embedder;
use logsift::ingest::{self, IngestOptions};
use logsift::progress::ProgressMode;
use logsift::query;
use logsift::stats;
use logsift::vectorize::{self, VectorizeOptions};
use logsift_core::chunk::ChunkUnit;

/// logsift: error-aware semantic search over raw log files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means all defaults.
#[derive(Parser)]
#[command(
    name = "logsift",
    about = "logsift: error-aware semantic search over raw log files",
    version,
    long_about = "logsift chunks raw logs, embeds and indexes the chunks, extracts and \
    fingerprints error events from Python, JVM, .NET and web-server logs, and answers \
    natural-language queries with a blended semantic + lexical ranking that puts the \
    most severe error clusters first."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/logsift.toml")]
    config: PathBuf,

    /// Debug-level logging on stderr (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk every matching log file under a folder.
    ///
    /// Rewrites `<data_dir>/chunks.jsonl`. Unreadable files are skipped
    /// and counted.
    Ingest {
        /// Folder to scan. Defaults to `[paths].log_folder`.
        folder: Option<PathBuf>,

        /// Window size in units (overrides `[chunking].chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Units shared by consecutive windows; must be below the size.
        #[arg(long)]
        overlap: Option<usize>,

        /// Window unit: `chars`, `words`, or `lines`.
        #[arg(long)]
        unit: Option<ChunkUnit>,

        /// Progress output: `off`, `human`, or `json` (stderr).
        #[arg(long)]
        progress: Option<String>,
    },

    /// Embed ingested chunks, write a vector snapshot and build the index.
    Vectorize {
        /// Neither read nor write the embedding cache.
        #[arg(long)]
        no_cache: bool,

        /// Clear the embedding cache before starting.
        #[arg(long)]
        clear_cache: bool,

        /// Progress output: `off`, `human`, or `json` (stderr).
        #[arg(long)]
        progress: Option<String>,
    },

    /// Ask a question about the logs. Prints a JSON response.
    Query {
        /// Natural-language query, e.g. "all errors" or "why did payments time out".
        query: String,

        /// Single-line JSON instead of pretty-printed.
        #[arg(long)]
        compact: bool,
    },

    /// Show what has been ingested, vectorized and cached.
    Stats {
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Embedding cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Delete the cache files and reset its counters.
    Clear,
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("logsift={level},logsift_core={level}")));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

fn load(path: &PathBuf) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            folder,
            chunk_size,
            overlap,
            unit,
            progress,
        } => {
            let mode = ProgressMode::parse(progress.as_deref())?;
            let opts = IngestOptions {
                folder,
                chunk_size,
                overlap,
                unit,
            };
            let report = ingest::run_ingest(&cfg, &opts, mode.reporter().as_ref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Vectorize {
            no_cache,
            clear_cache,
            progress,
        } => {
            let mode = ProgressMode::parse(progress.as_deref())?;
            let embedder = create_embedder(&cfg.embedding)?;
            let opts = VectorizeOptions {
                use_cache: !no_cache,
                clear_cache,
            };
            let report =
                vectorize::run_vectorize(&cfg, embedder, opts, mode.reporter().as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Query { query: text, compact } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let response = query::run_query(&cfg, embedder.as_ref(), &text).await?;
            let out = if compact {
                serde_json::to_string(&response)?
            } else {
                serde_json::to_string_pretty(&response)?
            };
            println!("{}", out);
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json)?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Clear => {
                stats::run_cache_clear(&cfg)?;
            }
        },
    }
    Ok(())
}
