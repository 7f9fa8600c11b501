//! Embedding and index build over the ingested chunks.
//!
//! Reads `chunks.jsonl`, answers what it can from the [`EmbeddingCache`],
//! embeds the misses across a bounded pool of tokio tasks, writes a vector
//! snapshot and builds the index pair the query path prefers.
//!
//! # Concurrency
//!
//! Each cache miss is one task. A [`Semaphore`] with `embedding.workers`
//! permits bounds how many run at once. The cache is shared behind a
//! `tokio::sync::Mutex`, so every `set` is serialized. A failed embed is
//! counted and skipped; sibling tasks are unaffected.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use logsift_core::extract::{truncate_chars, ErrorExtractor};
use logsift_core::hints::chunk_metadata;
use logsift_core::index::{IndexStats, VectorIndex};
use logsift_core::models::EmbeddedChunk;
use logsift_core::{Embedder, Error as CoreError};

use crate::cache::EmbeddingCache;
use crate::config::Config;
use crate::ingest::{load_chunks, ChunkRecord};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::snapshot::{self, LATEST_INDEX};

/// Cache subdirectory of the data dir.
pub const CACHE_DIR: &str = "embedding_cache";

#[derive(Debug, Clone, Copy)]
pub struct VectorizeOptions {
    pub use_cache: bool,
    pub clear_cache: bool,
}

impl Default for VectorizeOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            clear_cache: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorizeReport {
    pub total: usize,
    pub cached: usize,
    pub newly_embedded: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
    pub snapshot: Option<PathBuf>,
    /// `None` when there was nothing to index or the build failed.
    pub index_stats: Option<IndexStats>,
}

pub async fn run_vectorize(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    opts: VectorizeOptions,
    progress: &dyn ProgressReporter,
) -> Result<VectorizeReport> {
    let started = Instant::now();
    let data_dir = config.paths.data_dir.clone();
    let records = load_chunks(&data_dir)?;
    let total = records.len();

    let cache_dir = data_dir.join(CACHE_DIR);
    if opts.clear_cache {
        EmbeddingCache::load(&cache_dir).clear()?;
    }

    if records.is_empty() {
        tracing::warn!("chunks.jsonl is empty; run ingest on a folder with logs first");
        return Ok(VectorizeReport {
            total: 0,
            cached: 0,
            newly_embedded: 0,
            failed: 0,
            elapsed_secs: started.elapsed().as_secs_f64(),
            snapshot: None,
            index_stats: None,
        });
    }

    let cache = if opts.use_cache {
        Some(Arc::new(Mutex::new(EmbeddingCache::load(&cache_dir))))
    } else {
        None
    };

    // Partition into hits and misses.
    let mut vectors: Vec<Option<Vec<f32>>> = vec![None; total];
    let mut misses: Vec<usize> = Vec::new();
    match &cache {
        Some(cache) => {
            let mut guard = cache.lock().await;
            for (i, record) in records.iter().enumerate() {
                match guard.get(&record.content) {
                    Some(v) => vectors[i] = Some(v),
                    None => misses.push(i),
                }
            }
        }
        None => misses.extend(0..total),
    }
    let cached = total - misses.len();
    tracing::info!(total, cached, to_embed = misses.len(), "checked embedding cache");
    progress.report(ProgressEvent::CacheChecked {
        cached: cached as u64,
        total: total as u64,
    });

    let (newly_embedded, failed) = embed_misses(
        config,
        &embedder,
        &records,
        &misses,
        cache.clone(),
        &mut vectors,
        progress,
    )
    .await;

    if failed > 0 {
        tracing::warn!(
            "{}",
            CoreError::PartialIngestFailure {
                failed,
                total: misses.len()
            }
        );
    }

    if let Some(cache) = &cache {
        let mut guard = cache.lock().await;
        if let Err(e) = guard.save() {
            tracing::warn!(error = %e, "failed to save embedding cache");
        }
        tracing::info!(stats = ?guard.stats(), "embedding cache");
    }

    // Assemble the snapshot in chunk order.
    let extractor = ErrorExtractor::default();
    let entries: Vec<EmbeddedChunk> = records
        .iter()
        .zip(vectors)
        .filter_map(|(record, vector)| {
            vector.map(|vector| EmbeddedChunk {
                metadata: chunk_metadata(
                    &record.source,
                    record.chunk_index,
                    &record.content,
                    &extractor,
                ),
                vector,
            })
        })
        .collect();

    if entries.is_empty() {
        tracing::warn!("no chunk could be embedded; nothing to snapshot");
        return Ok(VectorizeReport {
            total,
            cached,
            newly_embedded,
            failed,
            elapsed_secs: started.elapsed().as_secs_f64(),
            snapshot: None,
            index_stats: None,
        });
    }

    let stamp = snapshot::stamp(chrono::Utc::now());
    let snapshot_path = snapshot::snapshot_path(&data_dir, &stamp);
    snapshot::write_snapshot(&snapshot_path, &entries)?;

    progress.report(ProgressEvent::Indexing {
        vectors: entries.len() as u64,
    });
    let index_stats = match build_and_save_index(config, entries, &stamp).await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "index build failed; queries will use the brute-force scan");
            None
        }
    };

    let report = VectorizeReport {
        total,
        cached,
        newly_embedded,
        failed,
        elapsed_secs: started.elapsed().as_secs_f64(),
        snapshot: Some(snapshot_path),
        index_stats,
    };
    tracing::info!(
        total,
        cached,
        newly_embedded,
        failed,
        elapsed_secs = report.elapsed_secs,
        "vectorize complete"
    );
    Ok(report)
}

/// Embed `misses` on the worker pool, filling `vectors`. Returns `(ok, failed)`.
async fn embed_misses(
    config: &Config,
    embedder: &Arc<dyn Embedder>,
    records: &[ChunkRecord],
    misses: &[usize],
    cache: Option<Arc<Mutex<EmbeddingCache>>>,
    vectors: &mut [Option<Vec<f32>>],
    progress: &dyn ProgressReporter,
) -> (usize, usize) {
    let semaphore = Arc::new(Semaphore::new(config.embedding.workers));
    let max_chars = config.embedding.max_chars;
    let dims = embedder.dims();
    let mut tasks: JoinSet<(usize, Result<Vec<f32>>)> = JoinSet::new();

    for &i in misses {
        let semaphore = Arc::clone(&semaphore);
        let embedder = Arc::clone(embedder);
        let cache = cache.clone();
        let text = records[i].content.clone();

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(e) => return (i, Err(e.into())),
            };
            let result = embedder
                .embed(truncate_chars(&text, max_chars))
                .await
                .and_then(|v| {
                    if v.len() != dims {
                        anyhow::bail!("embedder returned {} dimensions, expected {}", v.len(), dims);
                    }
                    Ok(v)
                });
            if let (Ok(vector), Some(cache)) = (&result, &cache) {
                cache.lock().await.set(&text, vector.clone());
            }
            (i, result)
        });
    }

    let mut ok = 0usize;
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, Ok(vector))) => {
                vectors[i] = Some(vector);
                ok += 1;
            }
            Ok((i, Err(e))) => {
                tracing::warn!(source = %records[i].source, chunk = records[i].chunk_index, error = %e, "embedding failed");
                failed += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding task panicked");
                failed += 1;
            }
        }
        progress.report(ProgressEvent::Embedding {
            n: (ok + failed) as u64,
            total: misses.len() as u64,
        });
    }
    (ok, failed)
}

/// Build on a blocking thread, then save as `index_<stamp>` and `index_latest`.
async fn build_and_save_index(
    config: &Config,
    entries: Vec<EmbeddedChunk>,
    stamp: &str,
) -> Result<IndexStats> {
    let iterations = config.index.kmeans_iterations;
    let data_dir = config.paths.data_dir.clone();
    let stamped = snapshot::index_base(&data_dir, &format!("index_{}", stamp));
    let latest = snapshot::index_base(&data_dir, LATEST_INDEX);

    tokio::task::spawn_blocking(move || {
        let (vectors, metadata): (Vec<Vec<f32>>, Vec<_>) = entries
            .into_iter()
            .map(|e| (e.vector, e.metadata))
            .unzip();
        let index = VectorIndex::build(&vectors, metadata, iterations)?;
        index
            .save(&stamped)
            .with_context(|| format!("Failed to save index {}", stamped.display()))?;
        index
            .save(&latest)
            .with_context(|| format!("Failed to save index {}", latest.display()))?;
        Ok(index.stats())
    })
    .await?
}
