//! Data directory overview.
//!
//! Summarises what a query would run against: how many chunks were
//! ingested, how many snapshots exist, the latest index and the embedding
//! cache counters. Used by `logsift stats` to confirm that ingest and
//! vectorize did what was expected.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use logsift_core::index::{IndexStats, VectorIndex};

use crate::cache::{CacheStats, EmbeddingCache};
use crate::config::Config;
use crate::ingest::CHUNKS_FILE;
use crate::snapshot::{self, LATEST_INDEX};
use crate::vectorize::CACHE_DIR;

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub data_dir: PathBuf,
    /// Lines in `chunks.jsonl`, `None` if ingest never ran.
    pub chunks: Option<usize>,
    pub snapshots: usize,
    pub latest_snapshot: Option<PathBuf>,
    /// `None` if no index pair is present or it cannot be read.
    pub index: Option<IndexStats>,
    pub cache: CacheStats,
}

pub fn collect_stats(config: &Config) -> Result<StatsReport> {
    let data_dir = config.paths.data_dir.clone();

    let chunks = std::fs::read_to_string(data_dir.join(CHUNKS_FILE))
        .ok()
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count());

    let snapshots = snapshot::list_snapshots(&data_dir)?;
    let index = match VectorIndex::load(&snapshot::index_base(&data_dir, LATEST_INDEX)) {
        Ok(index) => Some(index.stats()),
        Err(e) => {
            tracing::debug!(error = %e, "no readable index");
            None
        }
    };
    let cache = EmbeddingCache::load(&data_dir.join(CACHE_DIR)).stats();

    Ok(StatsReport {
        data_dir,
        chunks,
        snapshots: snapshots.len(),
        latest_snapshot: snapshots.last().cloned(),
        index,
        cache,
    })
}

/// Run the stats command: collect and print a summary.
pub fn run_stats(config: &Config, json: bool) -> Result<()> {
    let report = collect_stats(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("logsift data stats");
    println!("=================");
    println!();
    println!("  Data dir:    {}", report.data_dir.display());
    println!(
        "  Chunks:      {}",
        report
            .chunks
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none (run ingest)".to_string())
    );
    println!("  Snapshots:   {}", report.snapshots);
    if let Some(latest) = &report.latest_snapshot {
        println!("  Latest:      {}", latest.display());
    }

    println!();
    match &report.index {
        Some(index) => {
            println!("  Index:       {} ({})", index.status, index.topology);
            println!("    vectors:   {}", index.total_vectors);
            println!("    dimension: {}", index.dimension);
            if let (Some(nlist), Some(nprobe)) = (index.nlist, index.nprobe) {
                println!("    nlist:     {}  nprobe: {}", nlist, nprobe);
            }
            println!("    trained:   {}", index.is_trained);
        }
        None => println!("  Index:       none (run vectorize)"),
    }

    println!();
    let c = &report.cache;
    println!("  Cache:       {} entries, {:.2} MB", c.cache_size, c.cache_size_mb);
    println!(
        "    hits: {}  misses: {}  saves: {}  hit rate: {:.2}%",
        c.total_hits, c.total_misses, c.total_saves, c.hit_rate_percent
    );
    println!();
    Ok(())
}

/// `logsift cache clear`.
pub fn run_cache_clear(config: &Config) -> Result<()> {
    let mut cache = EmbeddingCache::load(&config.paths.data_dir.join(CACHE_DIR));
    let entries = cache.len();
    cache.clear()?;
    println!("Cleared {} cached embeddings from {}", entries, cache.dir().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stats_on_empty_dir() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.paths.data_dir = tmp.path().join("data");
        let report = collect_stats(&config).unwrap();
        assert_eq!(report.chunks, None);
        assert_eq!(report.snapshots, 0);
        assert!(report.index.is_none());
        assert_eq!(report.cache.cache_size, 0);
    }

    #[test]
    fn test_stats_sees_index_and_cache() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.paths.data_dir = tmp.path().to_path_buf();
        std::fs::write(tmp.path().join(CHUNKS_FILE), "{}\n{}\n").unwrap();

        let index = VectorIndex::build(
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![Default::default(), Default::default()],
            5,
        )
        .unwrap();
        index.save(&snapshot::index_base(tmp.path(), LATEST_INDEX)).unwrap();

        let mut cache = EmbeddingCache::load(&tmp.path().join(CACHE_DIR));
        cache.set("x", vec![1.0]);
        cache.save().unwrap();

        let report = collect_stats(&config).unwrap();
        assert_eq!(report.chunks, Some(2));
        let stats = report.index.unwrap();
        assert_eq!(stats.total_vectors, 2);
        assert_eq!(stats.topology, "flat");
        assert_eq!(report.cache.cache_size, 1);

        run_cache_clear(&config).unwrap();
        assert_eq!(collect_stats(&config).unwrap().cache.cache_size, 0);
    }
}
