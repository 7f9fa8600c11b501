//! Natural-language queries over the latest vector snapshot.
//!
//! Loads the newest `vectors_*.json` and the `index_latest` pair, runs the
//! [`HybridRetriever`], re-extracts errors from the retrieved chunks and
//! ranks them into fingerprint clusters. The response is one of three
//! JSON shapes:
//!
//! - **no data**: `{ "query", "error" }` when nothing has been vectorized;
//! - **excerpts**: `{ "query", "results", "metadata", "message" }` when the
//!   retrieved chunks hold no error events;
//! - **error patterns**: `{ "query", "error_patterns", "error_analysis" }`.
//!
//! A missing or unreadable index is not an error here: the retriever scans
//! the snapshot instead.

use anyhow::Result;
use serde::Serialize;

use logsift_core::cluster::{self, ClusterSummary};
use logsift_core::extract::{truncate_chars, ErrorExtractor};
use logsift_core::hints::HintSummary;
use logsift_core::index::VectorIndex;
use logsift_core::models::RetrievedItem;
use logsift_core::retrieve::{CandidatePath, HybridRetriever, QueryIntent, RetrievalConfig};
use logsift_core::{Embedder, Error as CoreError};

use crate::config::Config;
use crate::snapshot::{self, LATEST_INDEX};

/// Excerpts returned when no errors were found.
pub const MAX_EXCERPTS: usize = 50;
/// Characters of each returned excerpt.
pub const EXCERPT_CHARS: usize = 15_000;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryResponse {
    NoData {
        query: String,
        error: String,
    },
    Excerpts {
        query: String,
        results: Vec<ScoredChunk>,
        metadata: ExcerptMetadata,
        message: String,
    },
    ErrorPatterns {
        query: String,
        error_patterns: Vec<ScoredChunk>,
        error_analysis: ErrorAnalysis,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub path: String,
    pub chunk: String,
    pub score: f64,
}

impl From<&RetrievedItem> for ScoredChunk {
    fn from(item: &RetrievedItem) -> Self {
        Self {
            path: item.path.clone(),
            chunk: truncate_chars(&item.chunk_text, EXCERPT_CHARS).to_string(),
            score: item.score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcerptMetadata {
    #[serde(flatten)]
    pub hints: HintSummary,
    pub total_chunks_analyzed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub total_errors: usize,
    pub unique_error_patterns: usize,
    pub clusters: Vec<ClusterSummary>,
    pub metadata: HintSummary,
    pub retrieval_stats: RetrievalStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalStats {
    pub chunks_analyzed: usize,
    pub total_chunks: usize,
    pub coverage_percentage: f64,
    pub path: CandidatePath,
    pub relaxed: bool,
    pub intent: QueryIntent,
}

pub async fn run_query(
    config: &Config,
    embedder: &dyn Embedder,
    query: &str,
) -> Result<QueryResponse> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CoreError::InvalidParameters("query must not be empty".into()).into());
    }

    let data_dir = &config.paths.data_dir;
    let Some(snapshot_path) = snapshot::latest_snapshot(data_dir)? else {
        tracing::warn!(dir = %data_dir.display(), "{}", CoreError::NoVectorDataFound(data_dir.clone()));
        return Ok(no_data(query));
    };
    let corpus = snapshot::load_snapshot(&snapshot_path)?;
    if corpus.is_empty() {
        tracing::warn!(path = %snapshot_path.display(), "vector snapshot is empty");
        return Ok(no_data(query));
    }
    tracing::info!(query, total_chunks = corpus.len(), snapshot = %snapshot_path.display(), "query");

    let index = match VectorIndex::load(&snapshot::index_base(data_dir, LATEST_INDEX)) {
        Ok(index) => Some(index),
        Err(e) => {
            tracing::warn!(error = %e, "index unavailable, scanning snapshot");
            None
        }
    };

    let retrieval = HybridRetriever::new(embedder, &corpus)
        .with_index(index.as_ref())
        .with_config(RetrievalConfig {
            top_k_broad: config.index.top_k_broad,
            top_k_default: config.index.top_k_default,
        })
        .retrieve(query)
        .await?;

    let extractor = ErrorExtractor::default();
    let events: Vec<_> = retrieval
        .items
        .iter()
        .flat_map(|item| extractor.extract(&item.chunk_text, Some(&item.path)))
        .collect();
    let hints = HintSummary::from_texts(retrieval.items.iter().map(|i| i.chunk_text.as_str()));
    tracing::info!(
        retrieved = retrieval.items.len(),
        events = events.len(),
        path = ?retrieval.path,
        relaxed = retrieval.relaxed,
        "retrieval finished"
    );

    if events.is_empty() {
        return Ok(QueryResponse::Excerpts {
            query: query.to_string(),
            results: retrieval
                .items
                .iter()
                .take(MAX_EXCERPTS)
                .map(ScoredChunk::from)
                .collect(),
            metadata: ExcerptMetadata {
                hints,
                total_chunks_analyzed: retrieval.items.len(),
            },
            message: "No errors found in matching log chunks. Showing relevant excerpts."
                .to_string(),
        });
    }

    let total_errors = events.len();
    let clusters = cluster::cluster(events);
    let selected = cluster::select(&clusters, retrieval.intent.cluster_budget());
    tracing::info!(clusters = clusters.len(), selected = selected.len(), "ranked error patterns");

    let chunks_analyzed = retrieval.items.len();
    let coverage = chunks_analyzed as f64 / corpus.len() as f64 * 100.0;

    Ok(QueryResponse::ErrorPatterns {
        query: query.to_string(),
        error_patterns: selected
            .iter()
            .map(|item| ScoredChunk {
                path: item.path.clone(),
                chunk: item.chunk_text.clone(),
                score: item.score,
            })
            .collect(),
        error_analysis: ErrorAnalysis {
            total_errors,
            unique_error_patterns: clusters.len(),
            clusters: clusters.iter().map(|c| c.summary()).collect(),
            metadata: hints,
            retrieval_stats: RetrievalStats {
                chunks_analyzed,
                total_chunks: corpus.len(),
                coverage_percentage: (coverage * 100.0).round() / 100.0,
                path: retrieval.path,
                relaxed: retrieval.relaxed,
                intent: retrieval.intent,
            },
        },
    })
}

fn no_data(query: &str) -> QueryResponse {
    QueryResponse::NoData {
        query: query.to_string(),
        error: "no vector data".to_string(),
    }
}
