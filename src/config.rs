//! Configuration parsing and validation.
//!
//! logsift is configured via a TOML file (default: `config/logsift.toml`).
//! Every section and key has a default, so an empty file is a valid config.
//!
//! # Sections
//!
//! | Section | Purpose |
//! |---------|---------|
//! | `[paths]` | Default log folder and the data directory for artifacts |
//! | `[chunking]` | Window size, overlap, unit, streaming threshold, file globs |
//! | `[embedding]` | Provider, model, dimensions, worker pool |
//! | `[index]` | Top-k per query intent, k-means rounds |
//!
//! # Example
//!
//! ```toml
//! [paths]
//! log_folder = "./logs"
//! data_dir = "./data"
//!
//! [chunking]
//! chunk_size = 4096
//! overlap = 1024
//! unit = "chars"
//!
//! [embedding]
//! provider = "local"
//! model = "all-minilm-l6-v2"
//! dims = 384
//! ```

use anyhow::{bail, Context, Result};
use logsift_core::chunk::ChunkUnit;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Folder ingested when `logsift ingest` gets no argument.
    #[serde(default = "default_log_folder")]
    pub log_folder: PathBuf,
    /// Holds `chunks.jsonl`, vector snapshots, index pairs and the cache.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_folder: default_log_folder(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_log_folder() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub unit: ChunkUnit,
    /// Files larger than this are chunked with the streaming reader.
    #[serde(default = "default_stream_threshold")]
    pub stream_threshold_bytes: u64,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            unit: ChunkUnit::default(),
            stream_threshold_bytes: default_stream_threshold(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_chunk_size() -> usize {
    4096
}
fn default_overlap() -> usize {
    1024
}
fn default_stream_threshold() -> u64 {
    8 * 1024 * 1024
}
fn default_include_globs() -> Vec<String> {
    ["**/*.log", "**/*.txt", "**/*.out", "**/*.err"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Characters of chunk text sent to the model.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Concurrent embedding tasks during vectorize.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL (Ollama only).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            max_chars: default_max_chars(),
            workers: default_workers(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_max_chars() -> usize {
    8000
}
fn default_workers() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Neighbours fetched for summary / all-errors queries.
    #[serde(default = "default_top_k_broad")]
    pub top_k_broad: usize,
    #[serde(default = "default_top_k_default")]
    pub top_k_default: usize,
    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            top_k_broad: default_top_k_broad(),
            top_k_default: default_top_k_default(),
            kmeans_iterations: default_kmeans_iterations(),
        }
    }
}

fn default_top_k_broad() -> usize {
    150
}
fn default_top_k_default() -> usize {
    75
}
fn default_kmeans_iterations() -> usize {
    20
}

impl Config {
    /// All-defaults config for commands run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

/// Read, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap == 0 {
        bail!("chunking.overlap must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        bail!(
            "chunking.overlap ({}) must be < chunking.chunk_size ({})",
            config.chunking.overlap,
            config.chunking.chunk_size
        );
    }

    // Validate embedding
    if config.embedding.workers == 0 {
        bail!("embedding.workers must be >= 1");
    }
    if config.embedding.max_chars == 0 {
        bail!("embedding.max_chars must be > 0");
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, local, openai, or ollama.",
            other
        ),
    }

    // Validate index
    if config.index.top_k_broad == 0 || config.index.top_k_default == 0 {
        bail!("index.top_k_broad and index.top_k_default must be >= 1");
    }

    Ok(())
}
