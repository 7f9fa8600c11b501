//! Fingerprint clusters: grouping, ranking and budgeted selection.
//!
//! Clusters are ranked by `(severity desc, frequency desc)`; severity always
//! dominates. Selection walks the ranked list, rendering each cluster as a
//! fixed-shape snippet until the character budget would be exceeded; the
//! first cluster that does not fit is replaced by one marker item and
//! nothing after it is included.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::extract::{severity_rank, truncate_chars};
use crate::models::{ErrorEvent, RetrievedItem};

/// Characters of each message kept in `distinct_messages`.
pub const MESSAGE_KEY_LIMIT: usize = 200;
/// File paths listed in a snippet.
pub const SNIPPET_PATHS: usize = 5;

/// ErrorEvents sharing one fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub fingerprint: String,
    pub error_type: String,
    /// In order of extraction; the first is the exemplar.
    pub events: Vec<ErrorEvent>,
    pub distinct_paths: BTreeSet<String>,
    pub distinct_messages: BTreeSet<String>,
    /// Severity of the exemplar, 0..=5.
    pub severity: u8,
}

impl Cluster {
    fn new(event: ErrorEvent) -> Self {
        let severity = severity_rank(&event.error_type, &event.message);
        let mut cluster = Self {
            fingerprint: event.fingerprint.clone(),
            error_type: event.error_type.clone(),
            events: Vec::new(),
            distinct_paths: BTreeSet::new(),
            distinct_messages: BTreeSet::new(),
            severity,
        };
        cluster.push(event);
        cluster
    }

    fn push(&mut self, event: ErrorEvent) {
        if let Some(path) = &event.source_path {
            self.distinct_paths.insert(path.clone());
        }
        if !event.message.is_empty() {
            self.distinct_messages
                .insert(truncate_chars(&event.message, MESSAGE_KEY_LIMIT).to_string());
        }
        self.events.push(event);
    }

    pub fn frequency(&self) -> usize {
        self.events.len()
    }

    pub fn exemplar(&self) -> &ErrorEvent {
        &self.events[0]
    }

    /// `[type xN | Severity: S]`, the files, the exemplar excerpt, `---`.
    pub fn snippet(&self) -> String {
        let files = if self.distinct_paths.is_empty() {
            "Unknown".to_string()
        } else {
            self.distinct_paths
                .iter()
                .take(SNIPPET_PATHS)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "[{} x{} | Severity: {}]\nFiles: {}\n{}\n---",
            self.error_type,
            self.frequency(),
            self.severity,
            files,
            self.exemplar().excerpt
        )
    }

    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            fingerprint: self.fingerprint.clone(),
            error_type: self.error_type.clone(),
            count: self.frequency(),
            severity: self.severity,
            affected_files: self.distinct_paths.len(),
            unique_messages: self.distinct_messages.len(),
        }
    }
}

/// Serializable one-line view of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub fingerprint: String,
    pub error_type: String,
    pub count: usize,
    pub severity: u8,
    pub affected_files: usize,
    pub unique_messages: usize,
}

/// Group by exact fingerprint and rank. Ties keep first-seen order.
pub fn cluster(events: Vec<ErrorEvent>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    let mut by_fingerprint: HashMap<String, usize> = HashMap::new();

    for event in events {
        match by_fingerprint.get(&event.fingerprint) {
            Some(&i) => clusters[i].push(event),
            None => {
                by_fingerprint.insert(event.fingerprint.clone(), clusters.len());
                clusters.push(Cluster::new(event));
            }
        }
    }

    clusters.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.frequency().cmp(&a.frequency()))
    });
    clusters
}

/// Greedy budgeted selection over ranked clusters.
///
/// Selected snippets score 1.0. When a snippet would exceed `budget_chars`,
/// a marker item (path `summary`, score 0.5) counting the clusters left out
/// ends the list.
pub fn select(clusters: &[Cluster], budget_chars: usize) -> Vec<RetrievedItem> {
    let mut selected = Vec::new();
    let mut used = 0usize;

    for cluster in clusters {
        let snippet = cluster.snippet();
        let len = snippet.chars().count();
        if used + len > budget_chars {
            let remaining = clusters.len() - selected.len();
            selected.push(RetrievedItem {
                score: 0.5,
                semantic: 0.0,
                lexical: 0.0,
                path: "summary".to_string(),
                chunk_text: format!("\n... and {} more error patterns not shown", remaining),
            });
            break;
        }
        used += len;
        selected.push(RetrievedItem {
            score: 1.0,
            semantic: 0.0,
            lexical: 0.0,
            path: cluster
                .exemplar()
                .source_path
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            chunk_text: snippet,
        });
    }

    tracing::debug!(selected = selected.len(), clusters = clusters.len(), used, "selected error patterns");
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(fp: &str, error_type: &str, message: &str, path: Option<&str>) -> ErrorEvent {
        ErrorEvent {
            fingerprint: fp.to_string(),
            error_type: error_type.to_string(),
            message: message.to_string(),
            excerpt: format!("{}\n  at x.y(Z.java:1)", message),
            source_path: path.map(str::to_string),
        }
    }

    fn repeat(n: usize, fp: &str, error_type: &str, message: &str) -> Vec<ErrorEvent> {
        (0..n)
            .map(|i| event(fp, error_type, message, Some(&format!("f{}.log", i % 2))))
            .collect()
    }

    #[test]
    fn test_groups_by_fingerprint() {
        let events = vec![
            event("a", "ValueError", "bad 1", Some("x.log")),
            event("b", "KeyError", "missing", None),
            event("a", "ValueError", "bad 2", Some("y.log")),
            event("a", "ValueError", "bad 1", Some("x.log")),
        ];
        let clusters = cluster(events);
        assert_eq!(clusters.len(), 2);
        let a = &clusters[0];
        assert_eq!(a.fingerprint, "a");
        assert_eq!(a.frequency(), 3);
        assert_eq!(a.distinct_paths.len(), 2);
        assert_eq!(a.distinct_messages.len(), 2);
        assert_eq!(a.exemplar().message, "bad 1");
    }

    #[test]
    fn test_severity_dominates_frequency() {
        let mut events = repeat(10, "ten", "ValueError", "bad input");
        events.extend(repeat(3, "three", "KeyError", "missing key"));
        events.extend(repeat(1, "oom", "java.lang.OutOfMemoryError", "Java heap space"));

        let ranked = cluster(events);
        let order: Vec<(u8, usize)> = ranked.iter().map(|c| (c.severity, c.frequency())).collect();
        assert_eq!(order, vec![(5, 1), (2, 10), (2, 3)]);
    }

    #[test]
    fn test_snippet_shape() {
        let c = &cluster(vec![event("a", "KeyError", "missing", None)])[0];
        assert_eq!(
            c.snippet(),
            "[KeyError x1 | Severity: 2]\nFiles: Unknown\nmissing\n  at x.y(Z.java:1)\n---"
        );

        let many: Vec<ErrorEvent> = (0..7)
            .map(|i| event("p", "KeyError", "m", Some(&format!("{}.log", i))))
            .collect();
        let c = &cluster(many)[0];
        assert!(c.snippet().contains("Files: 0.log, 1.log, 2.log, 3.log, 4.log\n"));
        assert_eq!(c.summary().affected_files, 7);
    }

    #[test]
    fn test_select_within_budget() {
        let ranked = cluster(vec![
            event("a", "KeyError", "one", Some("a.log")),
            event("b", "KeyError", "two", Some("b.log")),
        ]);
        let items = select(&ranked, 100_000);
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.score == 1.0));
        assert_eq!(items[0].path, "a.log");
    }

    #[test]
    fn test_select_stops_at_budget_with_marker() {
        let ranked = cluster(vec![
            event("a", "KeyError", "one", Some("a.log")),
            event("b", "KeyError", "two", Some("b.log")),
            event("c", "KeyError", "three", Some("c.log")),
            event("d", "KeyError", "four", Some("d.log")),
        ]);
        let budget = ranked[0].snippet().chars().count() + ranked[1].snippet().chars().count();
        let items = select(&ranked, budget);
        assert_eq!(items.len(), 3);
        assert_eq!(items[2].path, "summary");
        assert_eq!(items[2].score, 0.5);
        assert_eq!(items[2].chunk_text, "\n... and 2 more error patterns not shown");
    }

    #[test]
    fn test_select_first_cluster_too_big() {
        let ranked = cluster(vec![event("a", "KeyError", "one", None)]);
        let items = select(&ranked, 10);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].chunk_text, "\n... and 1 more error patterns not shown");
        assert!(select(&[], 10).is_empty());
    }
}
