//! Retrieval hints pulled from chunk text: timeframes, class names, method
//! calls and error types. Stored with each indexed vector and aggregated
//! into query responses.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::extract::ErrorExtractor;
use crate::models::ChunkMetadata;

/// Distinct class and method names kept per chunk.
pub const MAX_NAMES: usize = 10;
/// Distinct timestamps kept in an aggregated summary.
pub const MAX_TIMEFRAMES: usize = 20;

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").unwrap());

static CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b([A-Z][a-zA-Z0-9_]*(?:Handler|Controller|Service|Trigger|Helper|Manager|Util|Utils|Batch|Queueable))\b",
    )
    .unwrap()
});

static METHOD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z][a-zA-Z0-9_]*)\s*\(").unwrap());

/// Every `YYYY-MM-DD[T ]HH:MM:SS` timestamp, in order of appearance.
pub fn timestamps(text: &str) -> Vec<String> {
    TIMESTAMP_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Up to [`MAX_NAMES`] distinct service-style class names, first seen first.
pub fn class_names(text: &str) -> Vec<String> {
    distinct_captures(&CLASS_RE, text)
}

/// Up to [`MAX_NAMES`] distinct lowerCamel call names, first seen first.
pub fn method_names(text: &str) -> Vec<String> {
    distinct_captures(&METHOD_RE, text)
}

fn distinct_captures(re: &Regex, text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        let name = &caps[1];
        if !out.iter().any(|n| n == name) {
            out.push(name.to_string());
            if out.len() == MAX_NAMES {
                break;
            }
        }
    }
    out
}

/// Build the metadata stored alongside a chunk's vector.
pub fn chunk_metadata(
    path: &str,
    chunk_index: usize,
    text: &str,
    extractor: &ErrorExtractor,
) -> ChunkMetadata {
    let stamps = timestamps(text);
    let mut error_types: Vec<String> = Vec::new();
    for event in extractor.extract(text, Some(path)) {
        if !error_types.contains(&event.error_type) {
            error_types.push(event.error_type);
        }
    }

    ChunkMetadata {
        path: path.to_string(),
        chunk_index,
        text: text.to_string(),
        timeframe_start: stamps.first().cloned(),
        timeframe_end: stamps.last().cloned(),
        classes: class_names(text),
        methods: method_names(text),
        has_errors: !error_types.is_empty(),
        error_types,
    }
}

/// Hints aggregated over a set of retrieved chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HintSummary {
    /// Sorted, at most [`MAX_TIMEFRAMES`].
    pub timeframes: Vec<String>,
    pub classes: Vec<String>,
    pub methods: Vec<String>,
}

impl HintSummary {
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let mut timeframes = BTreeSet::new();
        let mut classes = BTreeSet::new();
        let mut methods = BTreeSet::new();
        for text in texts {
            timeframes.extend(timestamps(text));
            classes.extend(class_names(text));
            methods.extend(method_names(text));
        }
        Self {
            timeframes: timeframes.into_iter().take(MAX_TIMEFRAMES).collect(),
            classes: classes.into_iter().collect(),
            methods: methods.into_iter().collect(),
        }
    }
}
