//! Vector snapshots and index artifact naming in the data directory.
//!
//! Each vectorize run writes `vectors_<YYYYmmdd_HHMMSS>.json` (a JSON array
//! of [`EmbeddedChunk`]) plus two index pairs, `index_<stamp>` and
//! `index_latest`. Queries read the lexicographically greatest snapshot,
//! which is the newest because the stamps sort chronologically.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use logsift_core::models::EmbeddedChunk;

use crate::cache::write_json_atomic;

const SNAPSHOT_PREFIX: &str = "vectors_";
const SNAPSHOT_SUFFIX: &str = ".json";
/// Base name of the index pair every query prefers.
pub const LATEST_INDEX: &str = "index_latest";

/// Generation stamp shared by a run's snapshot and index pair. UTC, so
/// stamps keep sorting chronologically across DST changes.
pub fn stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

pub fn snapshot_path(data_dir: &Path, stamp: &str) -> PathBuf {
    data_dir.join(format!("{}{}{}", SNAPSHOT_PREFIX, stamp, SNAPSHOT_SUFFIX))
}

/// Base path of an index pair; see `VectorIndex::artifact_paths`.
pub fn index_base(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(name)
}

pub fn write_snapshot(path: &Path, entries: &[EmbeddedChunk]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_json_atomic(path, entries)?;
    tracing::info!(path = %path.display(), entries = entries.len(), "vector snapshot written");
    Ok(())
}

/// All snapshot files, oldest first.
pub fn list_snapshots(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(data_dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to list {}", data_dir.display()))
        }
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(SNAPSHOT_SUFFIX) {
            snapshots.push(entry.path());
        }
    }
    snapshots.sort();
    Ok(snapshots)
}

pub fn latest_snapshot(data_dir: &Path) -> Result<Option<PathBuf>> {
    Ok(list_snapshots(data_dir)?.pop())
}

pub fn load_snapshot(path: &Path) -> Result<Vec<EmbeddedChunk>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let entries: Vec<EmbeddedChunk> = serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use logsift_core::models::ChunkMetadata;
    use tempfile::TempDir;

    #[test]
    fn test_stamp_format() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(stamp(t), "20240309_070501");
    }

    #[test]
    fn test_stamps_sort_across_fall_back() {
        // 01:30 EDT then 01:10 EST on the US fall-back night.
        let before = Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 11, 3, 6, 10, 0).unwrap();
        assert!(stamp(after) > stamp(before));
    }

    #[test]
    fn test_latest_is_lexicographic_max() {
        let tmp = TempDir::new().unwrap();
        assert!(latest_snapshot(tmp.path()).unwrap().is_none());
        assert!(latest_snapshot(&tmp.path().join("missing")).unwrap().is_none());

        for s in ["20240101_000000", "20241231_235959", "20240615_120000"] {
            write_snapshot(&snapshot_path(tmp.path(), s), &[]).unwrap();
        }
        std::fs::write(tmp.path().join("chunks.jsonl"), "").unwrap();

        assert_eq!(list_snapshots(tmp.path()).unwrap().len(), 3);
        let latest = latest_snapshot(tmp.path()).unwrap().unwrap();
        assert!(latest.ends_with("vectors_20241231_235959.json"));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let entries = vec![EmbeddedChunk {
            metadata: ChunkMetadata {
                path: "a.log".into(),
                text: "boom".into(),
                ..Default::default()
            },
            vector: vec![1.0, 0.0],
        }];
        let path = snapshot_path(tmp.path(), "20240101_000000");
        write_snapshot(&path, &entries).unwrap();
        assert_eq!(load_snapshot(&path).unwrap(), entries);

        std::fs::write(&path, b"[{").unwrap();
        assert!(load_snapshot(&path).is_err());
    }
}
