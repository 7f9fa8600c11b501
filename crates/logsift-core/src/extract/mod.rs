//! Error event extraction, fingerprinting and severity.
//!
//! [`ErrorExtractor`] runs an ordered list of [`BlockExtractor`]s over the
//! text, specific formats first and the keyword fallback last. All candidate
//! blocks are concatenated, then deduplicated on the first
//! [`DEDUP_PREFIX`] characters of the raw block (first occurrence wins).
//!
//! Each surviving block becomes an [`ErrorEvent`] whose fingerprint hashes
//!
//! ```text
//! error_type | normalized head (≤220 chars) | normalized top 5 frames (≤140 chars each)
//! ```
//!
//! Normalization collapses UUIDs, hex ids (≥8 chars) and decimal numbers to
//! placeholders and lowercases, so instances of one error that differ only
//! in ids, timestamps or line numbers share a fingerprint.
//!
//! | Extractor | Generic type |
//! |-----------|--------------|
//! | [`formats::PythonTraceback`] | `PythonException` |
//! | [`formats::JvmStack`] | `JavaLikeException` / `ApexException` / `GenericError` |
//! | [`formats::DotNetStack`] | `DotNetException` |
//! | [`formats::WebServerLine`] | `WebServerError` |
//! | [`formats::KeywordContext`] | `GenericError` |

pub mod formats;

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::models::ErrorEvent;

/// Maximum characters of the raw block kept as the event excerpt.
pub const EXCERPT_LIMIT: usize = 4000;
/// Characters of the raw block that identify a duplicate.
pub const DEDUP_PREFIX: usize = 800;
/// Maximum characters of the normalized head in the fingerprint.
pub const MESSAGE_STEM_LIMIT: usize = 220;
/// Maximum characters of each normalized frame in the fingerprint.
pub const FRAME_LIMIT: usize = 140;
/// Frames contributing to the fingerprint.
pub const MAX_FRAMES: usize = 5;
/// Hex digits kept from the SHA-256 digest (160 bits).
const FINGERPRINT_HEX_LEN: usize = 40;

static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}\b")
        .unwrap()
});

static HEX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b[0-9a-f]{8,}\b").unwrap());

static NUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());

static TYPE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z_][A-Za-z0-9_.$]*(?:Exception|Error|Throwable)\b").unwrap()
});

static LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(fatal|critical|error)\b").unwrap());

/// A raw block captured by one extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub block: String,
    /// Type used when no exception name can be read from the block.
    pub type_tag: &'static str,
}

impl Candidate {
    pub fn new(block: String, type_tag: &'static str) -> Self {
        Self { block, type_tag }
    }
}

/// One log format's block recognizer.
pub trait BlockExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, lines: &[&str]) -> Vec<Candidate>;
}

/// Ordered chain of extractors. Order is changed only by building a
/// different list with [`ErrorExtractor::with_extractors`].
pub struct ErrorExtractor {
    extractors: Vec<Box<dyn BlockExtractor>>,
}

impl Default for ErrorExtractor {
    fn default() -> Self {
        Self::with_extractors(vec![
            Box::new(formats::PythonTraceback),
            Box::new(formats::JvmStack),
            Box::new(formats::DotNetStack),
            Box::new(formats::WebServerLine),
            Box::new(formats::KeywordContext::default()),
        ])
    }
}

impl ErrorExtractor {
    pub fn with_extractors(extractors: Vec<Box<dyn BlockExtractor>>) -> Self {
        Self { extractors }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    /// Extract deduplicated, fingerprinted error events. Empty text yields none.
    pub fn extract(&self, text: &str, source_path: Option<&str>) -> Vec<ErrorEvent> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let text = text.replace("\r\n", "\n");
        let lines: Vec<&str> = text.split('\n').collect();

        let candidates: Vec<Candidate> = self
            .extractors
            .iter()
            .flat_map(|e| e.extract(&lines))
            .collect();

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for candidate in candidates {
            if candidate.block.is_empty() {
                continue;
            }
            if !seen.insert(sha256_hex(truncate_chars(&candidate.block, DEDUP_PREFIX))) {
                continue;
            }
            events.push(to_event(&candidate, source_path));
        }

        tracing::trace!(
            events = events.len(),
            source = source_path.unwrap_or("-"),
            "extracted error events"
        );
        events
    }
}

fn to_event(candidate: &Candidate, source_path: Option<&str>) -> ErrorEvent {
    let block = candidate.block.as_str();
    let head = block.lines().next().unwrap_or("");
    let error_type = derive_error_type(head, block, candidate.type_tag);

    let message_stem = normalize_for_fingerprint(head, MESSAGE_STEM_LIMIT);
    let frames: Vec<String> = block
        .lines()
        .skip(1)
        .filter(|line| is_frame_line(line))
        .take(MAX_FRAMES)
        .map(|line| normalize_for_fingerprint(line.trim(), FRAME_LIMIT))
        .collect();

    ErrorEvent {
        fingerprint: fingerprint(&format!("{}|{}|{}", error_type, message_stem, frames.join("|"))),
        error_type,
        message: head.trim().to_string(),
        excerpt: truncate_chars(block, EXCERPT_LIMIT).to_string(),
        source_path: source_path.map(str::to_string),
    }
}

fn is_frame_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("at ")
        || trimmed.starts_with("File ")
        || line.contains("Caused by:")
        || line.contains("StackTrace")
}

/// Exception-like name from the head, then from the whole block; then a
/// severity level word; then the extractor's tag.
pub fn derive_error_type(head: &str, block: &str, type_tag: &str) -> String {
    if let Some(m) = TYPE_NAME_RE.find(head).or_else(|| TYPE_NAME_RE.find(block)) {
        return m.as_str().to_string();
    }
    if let Some(m) = LEVEL_RE.find(head).or_else(|| LEVEL_RE.find(block)) {
        return m.as_str().to_uppercase();
    }
    type_tag.to_string()
}

/// Replace volatile identifiers, lowercase, and cut to `limit` characters.
pub fn normalize_for_fingerprint(s: &str, limit: usize) -> String {
    let s = s.replace("\r\n", "\n");
    let s = UUID_RE.replace_all(&s, "<UUID>");
    let s = HEX_RE.replace_all(&s, "<HEX>");
    let s = NUM_RE.replace_all(&s, "<NUM>");
    let s = s.trim().to_lowercase();
    truncate_chars(&s, limit).to_string()
}

/// Hex SHA-256 of `signature`, truncated to 160 bits.
pub fn fingerprint(signature: &str) -> String {
    let mut hex = sha256_hex(signature);
    hex.truncate(FINGERPRINT_HEX_LEN);
    hex
}

fn sha256_hex(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ordinal severity 0..=5 from keywords in the type and message.
///
/// | Rank | Keywords |
/// |------|----------|
/// | 5 | fatal, panic, outofmemory, out of memory, segfault, emerg |
/// | 4 | crash, deadlock, data loss, corrupt |
/// | 3 | timeout, deadline, nullpointer, null pointer, unauthorized, permission, access denied |
/// | 2 | error, exception, assert |
/// | 1 | warn |
pub fn severity_rank(error_type: &str, message: &str) -> u8 {
    const TIERS: [(u8, &[&str]); 5] = [
        (5, &["fatal", "panic", "outofmemory", "out of memory", "segfault", "emerg"]),
        (4, &["crash", "deadlock", "data loss", "corrupt"]),
        (
            3,
            &[
                "timeout",
                "deadline",
                "nullpointer",
                "null pointer",
                "unauthorized",
                "permission",
                "access denied",
            ],
        ),
        (2, &["error", "exception", "assert"]),
        (1, &["warn"]),
    ];

    let haystack = format!("{} {}", error_type, message).to_lowercase();
    TIERS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(rank, _)| *rank)
        .unwrap_or(0)
}

/// The first `max` characters of `s`.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npe_block(second: u32, line: u32) -> String {
        format!(
            "2024-03-01 10:00:{:02} ERROR [worker-{}] java.lang.NullPointerException: Cannot invoke \"String.length()\" because \"name\" is null\n    at com.acme.orders.OrderService.process(OrderService.java:{})\n    at com.acme.orders.OrderController.handle(OrderController.java:{})\n",
            second,
            second % 4,
            line,
            line + 40
        )
    }

    #[test]
    fn test_empty_text() {
        let extractor = ErrorExtractor::default();
        assert!(extractor.extract("", None).is_empty());
        assert!(extractor.extract("  \n\n ", Some("a.log")).is_empty());
        assert!(extractor.extract("all good\nnothing to see", None).is_empty());
    }

    #[test]
    fn test_default_order() {
        assert_eq!(
            ErrorExtractor::default().names(),
            vec!["python", "jvm", "dotnet", "web-server", "keyword"]
        );
    }

    #[test]
    fn test_normalization() {
        let s = "Request 550e8400-e29b-41d4-a716-446655440000 id DEADBEEF01 took 125 ms";
        assert_eq!(
            normalize_for_fingerprint(s, 400),
            "request <uuid> id <hex> took <num> ms"
        );
        assert_eq!(normalize_for_fingerprint("  Abcdef  ", 3), "abc");
    }

    #[test]
    fn test_fingerprint_ignores_volatile_ids() {
        let extractor = ErrorExtractor::default();
        let a = extractor.extract(
            "ERROR order 550e8400-e29b-41d4-a716-446655440000 failed after 3 tries (ref 0a1b2c3d4e5f)",
            None,
        );
        let b = extractor.extract(
            "ERROR order 123e4567-e89b-12d3-a456-426614174000 failed after 12 tries (ref ffee0011aabb)",
            None,
        );
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].fingerprint, b[0].fingerprint);
        assert_eq!(a[0].fingerprint.len(), 40);
        assert_ne!(a[0].message, b[0].message);
    }

    #[test]
    fn test_fingerprint_differs_by_type() {
        let extractor = ErrorExtractor::default();
        let a = extractor.extract("java.lang.IllegalStateException: pool closed", None);
        let b = extractor.extract("java.lang.IllegalArgumentException: pool closed", None);
        assert_ne!(a[0].fingerprint, b[0].fingerprint);
    }

    #[test]
    fn test_overlapping_extractors_deduplicate() {
        // Captured identically by the JVM, .NET and keyword extractors.
        let text = npe_block(1, 120);
        let events = ErrorExtractor::default().extract(&text, Some("svc.log"));
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.error_type, "java.lang.NullPointerException");
        assert!(event.message.starts_with("2024-03-01 10:00:01 ERROR"));
        assert_eq!(event.excerpt.lines().count(), 3);
        assert_eq!(event.source_path.as_deref(), Some("svc.log"));
    }

    #[test]
    fn test_nine_npes_share_one_fingerprint() {
        let text: String = (0..9)
            .map(|i| npe_block(i * 7 % 60, 100 + i * 13))
            .collect::<Vec<_>>()
            .join("\n");
        let events = ErrorExtractor::default().extract(&text, Some("svc.log"));
        assert_eq!(events.len(), 9);
        let first = &events[0].fingerprint;
        assert!(events.iter().all(|e| &e.fingerprint == first));
        assert_eq!(severity_rank(&events[0].error_type, &events[0].message), 3);
    }

    #[test]
    fn test_python_type_read_from_block() {
        let text = "Traceback (most recent call last):\n  File \"job.py\", line 9, in run\n    load()\nKeyError: 'user_id'";
        let events = ErrorExtractor::default().extract(text, None);
        assert_eq!(events[0].error_type, "KeyError");
        assert_eq!(events[0].message, "Traceback (most recent call last):");
    }

    #[test]
    fn test_type_falls_back_to_level_then_tag() {
        assert_eq!(derive_error_type("12:00 error disk full", "", "GenericError"), "ERROR");
        assert_eq!(
            derive_error_type("[crit] upstream gone", "[crit] upstream gone", "WebServerError"),
            "WebServerError"
        );
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(severity_rank("java.lang.OutOfMemoryError", "Java heap space"), 5);
        assert_eq!(severity_rank("GenericError", "kernel panic"), 5);
        assert_eq!(severity_rank("GenericError", "possible deadlock detected"), 4);
        assert_eq!(severity_rank("TimeoutException", "gave up"), 3);
        assert_eq!(severity_rank("ValueError", "bad input"), 2);
        assert_eq!(severity_rank("Notice", "WARN disk at 80%"), 1);
        assert_eq!(severity_rank("Notice", "all fine"), 0);
    }

    #[test]
    fn test_excerpt_is_capped() {
        let long = format!("ERROR {}", "x".repeat(5000));
        let events = ErrorExtractor::default().extract(&long, None);
        assert_eq!(events[0].excerpt.chars().count(), EXCERPT_LIMIT);
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
