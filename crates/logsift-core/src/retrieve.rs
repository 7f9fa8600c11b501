//! Hybrid semantic + lexical retrieval over one query.
//!
//! The retriever is a small state machine:
//!
//! ```text
//! embed ─▶ IndexSearch ──ok──▶ ThresholdFilter ──enough──▶ Done
//!              │                      │
//!            error                underflow
//!              ▼                      ▼
//!         FallbackScan ─────▶   RelaxedTopK ─▶ Done
//! ```
//!
//! Scores blend semantic similarity with lexical word overlap, weighted by
//! [`QueryIntent`]. The index path uses the index's `exp(-distance)`
//! similarity; the fallback path scans every stored vector with cosine
//! similarity. Index-path errors never reach the caller; embedding errors
//! always do.

use std::collections::HashSet;

use serde::Serialize;

use crate::embedding::{cosine_similarity, Embedder};
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{EmbeddedChunk, RetrievedItem};

/// Survivors below this count trigger underflow relaxation.
pub const MIN_SURVIVORS: usize = 10;
/// Items kept when the threshold is discarded.
pub const RELAXED_TOP_K: usize = 50;

const SUMMARY_KEYWORDS: &[&str] = &[
    "summarize",
    "summary",
    "overview",
    "what happened",
    "give me a summary",
    "summarise",
    "sum up",
    "recap",
    "walk me through",
    "key events",
    "aggregate",
    "overall",
    "root cause",
    "rca",
    "all errors",
    "list errors",
];

const ALL_ERRORS_KEYWORDS: &[&str] = &["all errors", "all unique", "list errors"];

/// What a query is asking for. Broad intents widen top-k, lower the score
/// threshold, lean more on lexical overlap and get a larger cluster budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    AllErrors,
    Summary,
    Default,
}

impl QueryIntent {
    pub fn classify(query: &str) -> Self {
        let q = query.to_lowercase();
        if ALL_ERRORS_KEYWORDS.iter().any(|k| q.contains(k)) {
            QueryIntent::AllErrors
        } else if SUMMARY_KEYWORDS.iter().any(|k| q.contains(k)) {
            QueryIntent::Summary
        } else {
            QueryIntent::Default
        }
    }

    pub fn is_broad(&self) -> bool {
        !matches!(self, QueryIntent::Default)
    }

    pub fn threshold(&self) -> f64 {
        if self.is_broad() {
            0.15
        } else {
            0.20
        }
    }

    /// `(semantic, lexical)` weights.
    pub fn weights(&self) -> (f64, f64) {
        if self.is_broad() {
            (0.6, 0.25)
        } else {
            (0.7, 0.2)
        }
    }

    pub fn score(&self, semantic: f64, lexical: f64) -> f64 {
        let (ws, wl) = self.weights();
        ws * semantic + wl * lexical
    }

    /// Character budget for selected cluster snippets.
    pub fn cluster_budget(&self) -> usize {
        if self.is_broad() {
            35_000
        } else {
            25_000
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::AllErrors => "all_errors",
            QueryIntent::Summary => "summary",
            QueryIntent::Default => "default",
        }
    }
}

/// Where the candidates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidatePath {
    Index,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    pub top_k_broad: usize,
    pub top_k_default: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_broad: 150,
            top_k_default: 75,
        }
    }
}

impl RetrievalConfig {
    pub fn top_k(&self, intent: QueryIntent) -> usize {
        if intent.is_broad() {
            self.top_k_broad
        } else {
            self.top_k_default
        }
    }
}

/// Outcome of one retrieval.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub items: Vec<RetrievedItem>,
    pub intent: QueryIntent,
    pub path: CandidatePath,
    /// True when underflow relaxation replaced the threshold filter.
    pub relaxed: bool,
    /// Candidates seen before threshold filtering.
    pub candidates: usize,
}

struct Candidate {
    item: RetrievedItem,
    /// Index similarity (index path) or the blended score (fallback path).
    raw: f64,
}

enum Phase {
    IndexSearch,
    FallbackScan,
    ThresholdFilter {
        path: CandidatePath,
        candidates: Vec<Candidate>,
        /// How many leading candidates the threshold is applied to.
        window: usize,
    },
    RelaxedTopK {
        path: CandidatePath,
        candidates: Vec<Candidate>,
    },
    Done(Retrieval),
}

/// Scores stored chunks against a query, preferring the vector index and
/// falling back to a brute-force scan of `corpus`.
pub struct HybridRetriever<'a> {
    embedder: &'a dyn Embedder,
    corpus: &'a [EmbeddedChunk],
    index: Option<&'a VectorIndex>,
    config: RetrievalConfig,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(embedder: &'a dyn Embedder, corpus: &'a [EmbeddedChunk]) -> Self {
        Self {
            embedder,
            corpus,
            index: None,
            config: RetrievalConfig::default(),
        }
    }

    pub fn with_index(mut self, index: Option<&'a VectorIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        if query.trim().is_empty() {
            return Err(Error::InvalidParameters("query must not be empty".into()));
        }

        let query_vector = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| Error::EmbeddingFailed(format!("{:#}", e)))?;

        let intent = QueryIntent::classify(query);
        let top_k = self.config.top_k(intent);
        let query_words = word_set(query);

        let mut phase = Phase::IndexSearch;
        loop {
            phase = match phase {
                Phase::IndexSearch => match self.index {
                    None => {
                        tracing::debug!("no vector index loaded, using fallback scan");
                        Phase::FallbackScan
                    }
                    Some(index) => {
                        match self.search_index(index, &query_vector, top_k, intent, &query_words) {
                            Ok(candidates) => Phase::ThresholdFilter {
                                path: CandidatePath::Index,
                                window: candidates.len(),
                                candidates,
                            },
                            Err(e) if e.is_index_path() => {
                                tracing::warn!(error = %e, "index search failed, using fallback scan");
                                Phase::FallbackScan
                            }
                            Err(e) => return Err(e),
                        }
                    }
                },
                Phase::FallbackScan => {
                    let candidates = self.scan(&query_vector, intent, &query_words);
                    Phase::ThresholdFilter {
                        path: CandidatePath::Fallback,
                        window: top_k.min(candidates.len()),
                        candidates,
                    }
                }
                Phase::ThresholdFilter {
                    path,
                    candidates,
                    window,
                } => {
                    let threshold = intent.threshold();
                    let survivors = candidates[..window]
                        .iter()
                        .filter(|c| c.item.score >= threshold)
                        .count();
                    if survivors < MIN_SURVIVORS && candidates.len() > MIN_SURVIVORS {
                        Phase::RelaxedTopK { path, candidates }
                    } else {
                        let mut items: Vec<RetrievedItem> = candidates
                            .into_iter()
                            .take(window)
                            .filter(|c| c.item.score >= threshold)
                            .map(|c| c.item)
                            .collect();
                        items.sort_by(|a, b| b.score.total_cmp(&a.score));
                        Phase::Done(Retrieval {
                            items,
                            intent,
                            path,
                            relaxed: false,
                            candidates: window,
                        })
                    }
                }
                Phase::RelaxedTopK { path, candidates } => {
                    let total = candidates.len();
                    let items = candidates
                        .into_iter()
                        .take(RELAXED_TOP_K)
                        .map(|c| match path {
                            // Index hits fall back to raw similarity, lexical unscored.
                            CandidatePath::Index => RetrievedItem {
                                score: c.raw,
                                semantic: c.raw,
                                lexical: 0.0,
                                ..c.item
                            },
                            CandidatePath::Fallback => c.item,
                        })
                        .collect();
                    tracing::debug!(candidates = total, "threshold underflow, relaxed to raw top-k");
                    Phase::Done(Retrieval {
                        items,
                        intent,
                        path,
                        relaxed: true,
                        candidates: total,
                    })
                }
                Phase::Done(retrieval) => {
                    tracing::info!(
                        items = retrieval.items.len(),
                        path = ?retrieval.path,
                        relaxed = retrieval.relaxed,
                        intent = intent.as_str(),
                        "retrieved chunks"
                    );
                    return Ok(retrieval);
                }
            };
        }
    }

    fn search_index(
        &self,
        index: &VectorIndex,
        query_vector: &[f32],
        top_k: usize,
        intent: QueryIntent,
        query_words: &HashSet<String>,
    ) -> Result<Vec<Candidate>> {
        let neighbors = index.search(query_vector, top_k)?;
        Ok(neighbors
            .into_iter()
            .map(|n| {
                let lexical = lexical_overlap(query_words, &n.metadata.text);
                Candidate {
                    item: RetrievedItem {
                        score: intent.score(n.similarity, lexical),
                        semantic: n.similarity,
                        lexical,
                        path: n.metadata.path.clone(),
                        chunk_text: n.metadata.text.clone(),
                    },
                    raw: n.similarity,
                }
            })
            .collect())
    }

    fn scan(
        &self,
        query_vector: &[f32],
        intent: QueryIntent,
        query_words: &HashSet<String>,
    ) -> Vec<Candidate> {
        let mut scored: Vec<Candidate> = self
            .corpus
            .iter()
            .filter(|entry| !entry.vector.is_empty())
            .map(|entry| {
                let semantic = cosine_similarity(query_vector, &entry.vector) as f64;
                let lexical = lexical_overlap(query_words, &entry.metadata.text);
                let score = intent.score(semantic, lexical);
                Candidate {
                    item: RetrievedItem {
                        score,
                        semantic,
                        lexical,
                        path: entry.metadata.path.clone(),
                        chunk_text: entry.metadata.text.clone(),
                    },
                    raw: score,
                }
            })
            .collect();
        scored.sort_by(|a, b| b.item.score.total_cmp(&a.item.score));
        scored
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Fraction of query words present in `text`: `|q ∩ t| / max(|q|, 1)`.
pub fn lexical_overlap(query_words: &HashSet<String>, text: &str) -> f64 {
    if query_words.is_empty() {
        return 0.0;
    }
    let words = word_set(text);
    let shared = query_words.iter().filter(|w| words.contains(*w)).count();
    shared as f64 / query_words.len().max(1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            anyhow::bail!("connection refused")
        }
    }

    fn entry(path: &str, text: &str, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            metadata: ChunkMetadata {
                path: path.into(),
                text: text.into(),
                ..Default::default()
            },
            vector,
        }
    }

    fn vectors_of(corpus: &[EmbeddedChunk]) -> Vec<Vec<f32>> {
        corpus.iter().map(|e| e.vector.clone()).collect()
    }

    fn metadata_of(corpus: &[EmbeddedChunk]) -> Vec<ChunkMetadata> {
        corpus.iter().map(|e| e.metadata.clone()).collect()
    }

    #[test]
    fn test_classify_intent() {
        assert_eq!(QueryIntent::classify("List ALL errors please"), QueryIntent::AllErrors);
        assert_eq!(QueryIntent::classify("show all unique failures"), QueryIntent::AllErrors);
        assert_eq!(QueryIntent::classify("give me an overview"), QueryIntent::Summary);
        assert_eq!(QueryIntent::classify("what is the root cause"), QueryIntent::Summary);
        assert_eq!(QueryIntent::classify("timeout in payment"), QueryIntent::Default);

        assert_eq!(QueryIntent::Summary.threshold(), 0.15);
        assert_eq!(QueryIntent::Default.threshold(), 0.20);
        assert_eq!(QueryIntent::AllErrors.cluster_budget(), 35_000);
        assert_eq!(QueryIntent::Default.cluster_budget(), 25_000);
        assert_eq!(RetrievalConfig::default().top_k(QueryIntent::Summary), 150);
        assert_eq!(RetrievalConfig::default().top_k(QueryIntent::Default), 75);
    }

    #[test]
    fn test_lexical_overlap() {
        let q = word_set("Payment TIMEOUT error");
        assert!((lexical_overlap(&q, "payment service timeout") - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(lexical_overlap(&q, "nothing shared"), 0.0);
        assert_eq!(lexical_overlap(&HashSet::new(), "anything"), 0.0);
    }

    #[tokio::test]
    async fn test_fallback_without_index() {
        let corpus = vec![
            entry("a.log", "payment timeout", vec![1.0, 0.0]),
            entry("b.log", "disk ok", vec![0.0, 1.0]),
        ];
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let out = HybridRetriever::new(&embedder, &corpus)
            .retrieve("payment timeout")
            .await
            .unwrap();
        assert_eq!(out.path, CandidatePath::Fallback);
        assert!(!out.relaxed);
        assert_eq!(out.items.len(), 1);
        let top = &out.items[0];
        assert_eq!(top.path, "a.log");
        assert!((top.semantic - 1.0).abs() < 1e-6);
        assert_eq!(top.lexical, 1.0);
        assert!((top.score - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_index_path_scores_with_similarity() {
        let corpus = vec![
            entry("a.log", "payment timeout", vec![1.0, 0.0]),
            entry("b.log", "disk ok", vec![0.0, 1.0]),
        ];
        let index = VectorIndex::build(&vectors_of(&corpus), metadata_of(&corpus), 5).unwrap();
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let out = HybridRetriever::new(&embedder, &corpus)
            .with_index(Some(&index))
            .retrieve("payment timeout")
            .await
            .unwrap();
        assert_eq!(out.path, CandidatePath::Index);
        assert_eq!(out.candidates, 2);
        // b.log: distance 2, similarity e^-2 ≈ 0.135, score ≈ 0.095 < 0.20
        assert_eq!(out.items.len(), 1);
        assert!((out.items[0].semantic - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_falls_back() {
        let corpus = vec![entry("a.log", "x", vec![1.0, 0.0, 0.0])];
        let index = VectorIndex::build(&vectors_of(&corpus), metadata_of(&corpus), 5).unwrap();
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let out = HybridRetriever::new(&embedder, &corpus)
            .with_index(Some(&index))
            .retrieve("x")
            .await
            .unwrap();
        assert_eq!(out.path, CandidatePath::Fallback);
    }

    #[tokio::test]
    async fn test_underflow_relaxation_fallback() {
        // Orthogonal vectors and no shared words: every score is 0.
        let corpus: Vec<EmbeddedChunk> = (0..60)
            .map(|i| entry(&format!("{}.log", i), "unrelated text", vec![0.0, 1.0]))
            .collect();
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let out = HybridRetriever::new(&embedder, &corpus)
            .retrieve("all errors")
            .await
            .unwrap();
        assert!(out.relaxed);
        assert_eq!(out.intent, QueryIntent::AllErrors);
        assert_eq!(out.items.len(), RELAXED_TOP_K);
    }

    #[tokio::test]
    async fn test_no_relaxation_with_ten_or_fewer_candidates() {
        let corpus: Vec<EmbeddedChunk> = (0..10)
            .map(|i| entry(&format!("{}.log", i), "unrelated", vec![0.0, 1.0]))
            .collect();
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let out = HybridRetriever::new(&embedder, &corpus)
            .retrieve("all errors")
            .await
            .unwrap();
        assert!(!out.relaxed);
        assert!(out.items.is_empty());
    }

    #[tokio::test]
    async fn test_underflow_relaxation_index_path() {
        let corpus: Vec<EmbeddedChunk> = (0..30)
            .map(|i| {
                entry(
                    &format!("{}.log", i),
                    "unrelated",
                    vec![-3.0 - i as f32 * 0.01, 0.0],
                )
            })
            .collect();
        let index = VectorIndex::build(&vectors_of(&corpus), metadata_of(&corpus), 5).unwrap();
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let out = HybridRetriever::new(&embedder, &corpus)
            .with_index(Some(&index))
            .with_config(RetrievalConfig {
                top_k_broad: 20,
                top_k_default: 20,
            })
            .retrieve("all errors")
            .await
            .unwrap();
        assert_eq!(out.path, CandidatePath::Index);
        assert!(out.relaxed);
        assert_eq!(out.items.len(), 20);
        for item in &out.items {
            assert_eq!(item.lexical, 0.0);
            assert_eq!(item.score, item.semantic);
        }
        assert_eq!(out.items[0].path, "0.log");
    }

    #[tokio::test]
    async fn test_embedding_failure_is_fatal() {
        let corpus = vec![entry("a.log", "x", vec![1.0, 0.0])];
        let err = HybridRetriever::new(&BrokenEmbedder, &corpus)
            .retrieve("anything")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmbeddingFailed(ref m) if m.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let embedder = FixedEmbedder(vec![1.0]);
        let err = HybridRetriever::new(&embedder, &[]).retrieve("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidParameters(_)));
    }
}
