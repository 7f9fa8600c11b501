//! Persistent, content-addressed embedding cache.
//!
//! Maps `sha256(text[..8000].trim())` to a previously computed vector so
//! unchanged chunks are never re-embedded. Two files live in the cache
//! directory (default `<data_dir>/embedding_cache/`):
//!
//! | File | Contents |
//! |------|----------|
//! | `embeddings.json` | `{ "<hex key>": [f32, ...], ... }` |
//! | `stats.json` | lifetime hit / miss / save counters and timestamps |
//!
//! Both are rewritten wholesale on [`EmbeddingCache::save`] through a temp
//! file and a rename. A missing or unreadable file loads as empty: the
//! cache is an optimisation and never blocks a run.
//!
//! The cache itself is not synchronized. Concurrent writers share it behind
//! a `tokio::sync::Mutex` (see [`crate::vectorize`]).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use logsift_core::extract::truncate_chars;

/// Characters of text that participate in the cache key.
pub const KEY_PREFIX_CHARS: usize = 8000;

const EMBEDDINGS_FILE: &str = "embeddings.json";
const STATS_FILE: &str = "stats.json";

/// Counters persisted in `stats.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheCounters {
    #[serde(default)]
    pub total_hits: u64,
    #[serde(default)]
    pub total_misses: u64,
    #[serde(default)]
    pub total_saves: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Default for CacheCounters {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            total_hits: 0,
            total_misses: 0,
            total_saves: 0,
            created_at: now,
            last_updated: now,
        }
    }
}

/// Point-in-time view returned by [`EmbeddingCache::stats`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub cache_size: usize,
    pub total_hits: u64,
    pub total_misses: u64,
    pub total_saves: u64,
    pub hit_rate_percent: f64,
    pub cache_size_mb: f64,
}

pub struct EmbeddingCache {
    dir: PathBuf,
    entries: HashMap<String, Vec<f32>>,
    counters: CacheCounters,
}

impl EmbeddingCache {
    /// Open the cache in `dir`, tolerating missing or corrupt files.
    pub fn load(dir: &Path) -> Self {
        let entries = read_json_or_default(&dir.join(EMBEDDINGS_FILE));
        let counters = read_json_or_default(&dir.join(STATS_FILE));
        Self {
            dir: dir.to_path_buf(),
            entries,
            counters,
        }
    }

    /// Hex SHA-256 of the first [`KEY_PREFIX_CHARS`] characters, stripped.
    pub fn key(text: &str) -> String {
        let content = truncate_chars(text, KEY_PREFIX_CHARS).trim();
        hex::encode(Sha256::digest(content.as_bytes()))
    }

    /// Look up a vector, counting the hit or miss.
    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        match self.entries.get(&Self::key(text)) {
            Some(vector) => {
                self.counters.total_hits += 1;
                Some(vector.clone())
            }
            None => {
                self.counters.total_misses += 1;
                None
            }
        }
    }

    pub fn set(&mut self, text: &str, vector: Vec<f32>) {
        self.entries.insert(Self::key(text), vector);
        self.counters.total_saves += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite both files.
    pub fn save(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;
        self.counters.last_updated = Utc::now();
        write_json_atomic(&self.dir.join(EMBEDDINGS_FILE), &self.entries)?;
        write_json_atomic(&self.dir.join(STATS_FILE), &self.counters)?;
        tracing::debug!(entries = self.entries.len(), dir = %self.dir.display(), "embedding cache saved");
        Ok(())
    }

    /// Delete both files and reset entries and counters.
    pub fn clear(&mut self) -> Result<()> {
        for name in [EMBEDDINGS_FILE, STATS_FILE] {
            let path = self.dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
                }
            }
        }
        self.entries.clear();
        self.counters = CacheCounters::default();
        tracing::info!(dir = %self.dir.display(), "embedding cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let requests = self.counters.total_hits + self.counters.total_misses;
        let hit_rate = if requests > 0 {
            self.counters.total_hits as f64 / requests as f64 * 100.0
        } else {
            0.0
        };
        let size_bytes = std::fs::metadata(self.dir.join(EMBEDDINGS_FILE))
            .map(|m| m.len())
            .unwrap_or(0);

        CacheStats {
            cache_size: self.entries.len(),
            total_hits: self.counters.total_hits,
            total_misses: self.counters.total_misses,
            total_saves: self.counters.total_saves,
            hit_rate_percent: round2(hit_rate),
            cache_size_mb: round2(size_bytes as f64 / (1024.0 * 1024.0)),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return T::default(),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable cache file");
            T::default()
        }
    }
}

/// Serialize to a sibling temp file, then rename over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
