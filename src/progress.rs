//! Ingest and vectorize progress reporting.
//!
//! Long runs report what they are doing and how much is left. Progress is
//! emitted on **stderr** so stdout stays parseable for scripts.

use std::io::Write;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Ingest: `n` files chunked out of `total`.
    Chunking { n: u64, total: u64 },
    /// Vectorize: cache lookup finished.
    CacheChecked { cached: u64, total: u64 },
    /// Vectorize: `n` cache misses embedded out of `total` (failures included).
    Embedding { n: u64, total: u64 },
    /// Vectorize: index build started over `vectors` rows.
    Indexing { vectors: u64 },
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: `vectorize  embedding  1,234 / 5,000 chunks`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Chunking { n, total } => format!(
                "ingest  chunking  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::CacheChecked { cached, total } => format!(
                "vectorize  cache  {} / {} chunks cached\n",
                format_number(*cached),
                format_number(*total)
            ),
            ProgressEvent::Embedding { n, total } => format!(
                "vectorize  embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Indexing { vectors } => {
                format!("vectorize  indexing  {} vectors\n", format_number(*vectors))
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ProgressEvent) -> serde_json::Value {
        match event {
            ProgressEvent::Chunking { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "chunking",
                "n": n,
                "total": total
            }),
            ProgressEvent::CacheChecked { cached, total } => serde_json::json!({
                "event": "progress",
                "phase": "cache",
                "cached": cached,
                "total": total
            }),
            ProgressEvent::Embedding { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            ProgressEvent::Indexing { vectors } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "vectors": vectors
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value.
    pub fn parse(value: Option<&str>) -> anyhow::Result<Self> {
        match value {
            None => Ok(Self::default_for_tty()),
            Some("off") | Some("none") => Ok(ProgressMode::Off),
            Some("human") => Ok(ProgressMode::Human),
            Some("json") => Ok(ProgressMode::Json),
            Some(other) => anyhow::bail!(
                "Invalid --progress value: '{}'. Use off, human, or json.",
                other
            ),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
