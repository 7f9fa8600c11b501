//! Log discovery and chunking.
//!
//! Walks a folder, keeps files matching the include globs (and not the
//! exclude globs), reads each one lossily as UTF-8, cuts it into overlapping
//! windows and writes every window to `<data_dir>/chunks.jsonl`:
//!
//! ```json
//! {"source":"app/server.log","chunk_index":0,"unit":"chars","length":4096,"content":"..."}
//! ```
//!
//! The file is rewritten wholesale on each run. Windows are written as they
//! are produced; files larger than `chunking.stream_threshold_bytes` go
//! through the streaming chunker so they are never held in memory whole.
//! A file that cannot be read is logged and counted in `files_failed`, and
//! any records it had already written are cut back off; it never aborts the
//! run.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use logsift_core::chunk::{self, ChunkStream, ChunkUnit};
use logsift_core::Error as CoreError;

use crate::config::Config;
use crate::progress::{ProgressEvent, ProgressReporter};

pub const CHUNKS_FILE: &str = "chunks.jsonl";

/// One line of `chunks.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub source: String,
    pub chunk_index: usize,
    pub unit: ChunkUnit,
    pub length: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub files_processed: usize,
    pub files_failed: usize,
    pub chunks_written: usize,
    pub output: PathBuf,
}

/// Per-run overrides of the `[chunking]` section.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub folder: Option<PathBuf>,
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
    pub unit: Option<ChunkUnit>,
}

/// A discovered log file.
#[derive(Debug, Clone)]
pub struct LogFile {
    pub path: PathBuf,
    /// Path relative to the scanned root, used as the chunk source.
    pub relative: String,
    pub size: u64,
}

/// List matching files under `root`, sorted by relative path.
pub fn scan_logs(root: &Path, include: &[String], exclude: &[String]) -> Result<Vec<LogFile>> {
    if !root.is_dir() {
        bail!("Log folder does not exist: {}", root.display());
    }

    let include_set = build_globset(include)?;
    let exclude_set = build_globset(exclude)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(LogFile {
            path: path.to_path_buf(),
            relative: rel_str,
            size,
        });
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Chunk one file, handing each window to `emit` as soon as it exists.
///
/// Files above `stream_threshold` bytes are read through [`ChunkStream`],
/// so only the current window and one read buffer are in memory. Returns
/// the number of windows emitted.
pub fn chunk_file(
    file: &LogFile,
    unit: ChunkUnit,
    size: usize,
    overlap: usize,
    stream_threshold: u64,
    mut emit: impl FnMut(String) -> Result<()>,
) -> Result<usize> {
    let mut emitted = 0usize;
    if file.size > stream_threshold {
        tracing::debug!(path = %file.relative, bytes = file.size, "streaming large file");
        let reader = std::fs::File::open(&file.path)
            .with_context(|| format!("Failed to open {}", file.path.display()))?;
        for window in ChunkStream::new(reader, unit, size, overlap)? {
            let window = window.with_context(|| format!("Failed to read {}", file.path.display()))?;
            emit(window)?;
            emitted += 1;
        }
        return Ok(emitted);
    }

    let bytes = std::fs::read(&file.path)
        .with_context(|| format!("Failed to read {}", file.path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    for window in chunk::chunk_text(&text, unit, size, overlap)? {
        emit(window)?;
        emitted += 1;
    }
    Ok(emitted)
}

/// Scan, chunk and write `chunks.jsonl`.
pub fn run_ingest(
    config: &Config,
    opts: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    let folder = opts
        .folder
        .clone()
        .unwrap_or_else(|| config.paths.log_folder.clone());
    let size = opts.chunk_size.unwrap_or(config.chunking.chunk_size);
    let overlap = opts.overlap.unwrap_or(config.chunking.overlap);
    let unit = opts.unit.unwrap_or(config.chunking.unit);

    // Bad parameters fail before any output is touched.
    chunk::validate(size, overlap)?;

    let files = scan_logs(
        &folder,
        &config.chunking.include_globs,
        &config.chunking.exclude_globs,
    )?;
    tracing::info!(folder = %folder.display(), files = files.len(), %unit, size, overlap, "ingesting logs");

    ingest_files(config, &files, unit, size, overlap, progress)
}

/// Chunk `files` into a fresh `chunks.jsonl`.
///
/// A file that fails part way has its records cut back off the output, so
/// a failed file never leaves partial windows behind.
pub fn ingest_files(
    config: &Config,
    files: &[LogFile],
    unit: ChunkUnit,
    size: usize,
    overlap: usize,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    chunk::validate(size, overlap)?;

    let data_dir = &config.paths.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data dir: {}", data_dir.display()))?;
    let output = data_dir.join(CHUNKS_FILE);
    let tmp = data_dir.join(format!("{}.tmp", CHUNKS_FILE));

    let mut writer = BufWriter::new(
        std::fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?,
    );

    let mut files_processed = 0usize;
    let mut files_failed = 0usize;
    let mut chunks_written = 0usize;
    let mut offset = 0u64;

    for file in files {
        let file_start = offset;
        let mut chunk_index = 0usize;
        let result = chunk_file(
            file,
            unit,
            size,
            overlap,
            config.chunking.stream_threshold_bytes,
            |content| {
                let record = ChunkRecord {
                    source: file.relative.clone(),
                    chunk_index,
                    unit,
                    length: content.chars().count(),
                    content,
                };
                let mut line = serde_json::to_vec(&record)?;
                line.push(b'\n');
                writer.write_all(&line)?;
                offset += line.len() as u64;
                chunk_index += 1;
                Ok(())
            },
        );

        match result {
            Ok(n) => {
                chunks_written += n;
                files_processed += 1;
            }
            Err(e) => {
                tracing::warn!(path = %file.relative, error = %e, "skipping file");
                files_failed += 1;
                if offset != file_start {
                    writer.flush()?;
                    writer.get_ref().set_len(file_start)?;
                    writer.seek(SeekFrom::Start(file_start))?;
                    offset = file_start;
                }
            }
        }
        progress.report(ProgressEvent::Chunking {
            n: (files_processed + files_failed) as u64,
            total: files.len() as u64,
        });
    }

    writer.flush()?;
    drop(writer);
    std::fs::rename(&tmp, &output)
        .with_context(|| format!("Failed to move {} into place", output.display()))?;

    if files_failed > 0 {
        let partial = CoreError::PartialIngestFailure {
            failed: files_failed,
            total: files.len(),
        };
        tracing::warn!("{}", partial);
    }
    tracing::info!(files_processed, files_failed, chunks_written, "ingest complete");

    Ok(IngestReport {
        files_processed,
        files_failed,
        chunks_written,
        output,
    })
}

/// Read `chunks.jsonl` back. A missing file means nothing was ingested.
pub fn load_chunks(data_dir: &Path) -> Result<Vec<ChunkRecord>> {
    let path = data_dir.join(CHUNKS_FILE);
    let file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoreError::NoVectorDataFound(path).into());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
    };

    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ChunkRecord = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed chunk record", path.display(), n + 1))?;
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    fn config_for(tmp: &TempDir) -> Config {
        let mut config = Config::minimal();
        config.paths.log_folder = tmp.path().join("logs");
        config.paths.data_dir = tmp.path().join("data");
        config
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "b.log", b"x");
        write(root, "a/nested.err", b"x");
        write(root, "notes.md", b"x");
        write(root, "skip/old.log", b"x");

        let files = scan_logs(
            root,
            &Config::minimal().chunking.include_globs,
            &["skip/**".to_string()],
        )
        .unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.relative.as_str()).collect();
        assert_eq!(names, vec!["a/nested.err", "b.log"]);
    }

    #[test]
    fn test_scan_missing_folder() {
        let err = scan_logs(Path::new("/no/such/logs"), &[], &[]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_ingest_writes_jsonl() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        write(&config.paths.log_folder, "big.log", "a".repeat(10_000).as_bytes());
        write(&config.paths.log_folder, "small.txt", b"one line\n");

        let report = run_ingest(&config, &IngestOptions::default(), &NoProgress).unwrap();
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.files_failed, 0);
        assert_eq!(report.chunks_written, 4);

        let records = load_chunks(&config.paths.data_dir).unwrap();
        let big: Vec<&ChunkRecord> = records.iter().filter(|r| r.source == "big.log").collect();
        assert_eq!(big.len(), 3);
        assert_eq!(big[0].length, 4096);
        assert_eq!(big[2].chunk_index, 2);
        assert_eq!(big[2].length, 10_000 - 6144);
        assert_eq!(records.last().unwrap().content, "one line\n");
    }

    #[test]
    fn test_ingest_streaming_matches_in_memory() {
        let tmp = TempDir::new().unwrap();
        let mut config = config_for(&tmp);
        let text: String = (0..500).map(|i| format!("line {} ok\n", i)).collect();
        write(&config.paths.log_folder, "app.log", text.as_bytes());

        run_ingest(&config, &IngestOptions::default(), &NoProgress).unwrap();
        let in_memory = load_chunks(&config.paths.data_dir).unwrap();

        config.chunking.stream_threshold_bytes = 0;
        run_ingest(&config, &IngestOptions::default(), &NoProgress).unwrap();
        let streamed = load_chunks(&config.paths.data_dir).unwrap();
        assert_eq!(in_memory, streamed);
    }

    #[test]
    fn test_ingest_rejects_bad_overlap() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        write(&config.paths.log_folder, "a.log", b"abc");
        let opts = IngestOptions {
            chunk_size: Some(10),
            overlap: Some(10),
            ..Default::default()
        };
        let err = run_ingest(&config, &opts, &NoProgress).unwrap_err();
        assert!(err.to_string().contains("invalid parameters"));
        assert!(!config.paths.data_dir.join(CHUNKS_FILE).exists());
    }

    #[test]
    fn test_ingest_lossy_utf8_and_line_unit() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        write(&config.paths.log_folder, "bin.log", b"ok\n\xff\xfe bad\nend\n");
        let opts = IngestOptions {
            chunk_size: Some(2),
            overlap: Some(1),
            unit: Some(ChunkUnit::Lines),
            ..Default::default()
        };
        let report = run_ingest(&config, &opts, &NoProgress).unwrap();
        assert_eq!(report.files_processed, 1);
        let records = load_chunks(&config.paths.data_dir).unwrap();
        assert_eq!(records[0].unit, ChunkUnit::Lines);
        assert!(records[0].content.starts_with("ok\n"));
        assert!(records[0].content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_unreadable_file_is_counted_and_skipped() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        let logs = &config.paths.log_folder;
        write(logs, "a.log", b"first file");
        write(logs, "b.log", b"vanishes before it is read");
        write(logs, "c.log", b"third file");
        write(&config.paths.data_dir, CHUNKS_FILE, b"{\"stale\":true}\n");

        let files = scan_logs(logs, &config.chunking.include_globs, &[]).unwrap();
        assert_eq!(files.len(), 3);
        std::fs::remove_file(logs.join("b.log")).unwrap();

        let report = ingest_files(&config, &files, ChunkUnit::Chars, 4096, 1024, &NoProgress).unwrap();
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.chunks_written, 2);

        let records = load_chunks(&config.paths.data_dir).unwrap();
        let sources: Vec<&str> = records.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(sources, vec!["a.log", "c.log"]);
        assert_eq!(records[1].content, "third file");
    }

    #[test]
    fn test_failed_stream_leaves_no_records() {
        let tmp = TempDir::new().unwrap();
        let config = config_for(&tmp);
        write(&config.paths.log_folder, "ok.log", b"kept");
        // A directory opens but cannot be read, so the streaming path fails.
        let dir = config.paths.log_folder.join("dir.log");
        std::fs::create_dir_all(&dir).unwrap();

        let files = vec![
            LogFile {
                path: dir,
                relative: "dir.log".to_string(),
                size: u64::MAX,
            },
            LogFile {
                path: config.paths.log_folder.join("ok.log"),
                relative: "ok.log".to_string(),
                size: 4,
            },
        ];
        let report = ingest_files(&config, &files, ChunkUnit::Lines, 2, 1, &NoProgress).unwrap();
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_processed, 1);

        let records = load_chunks(&config.paths.data_dir).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "ok.log");
        assert_eq!(records[0].chunk_index, 0);
    }

    #[test]
    fn test_chunk_file_emits_each_window() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "s.log", b"l1\nl2\nl3\n");
        let file = LogFile {
            path: tmp.path().join("s.log"),
            relative: "s.log".to_string(),
            size: 9,
        };
        let mut seen = Vec::new();
        let n = chunk_file(&file, ChunkUnit::Lines, 2, 1, 0, |w| {
            seen.push(w);
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen, vec!["l1\nl2\n", "l2\nl3\n"]);
    }

    #[test]
    fn test_load_chunks_missing_is_no_data() {
        let tmp = TempDir::new().unwrap();
        let err = load_chunks(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::NoVectorDataFound(_))
        ));
    }
}
