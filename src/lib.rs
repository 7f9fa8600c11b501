//! # logsift
//!
//! Error-aware semantic search over raw log files.
//!
//! logsift chunks raw logs into overlapping windows, embeds and indexes the
//! chunks, and answers natural-language queries by blending semantic and
//! lexical similarity. Error events found in the retrieved chunks are
//! fingerprinted into clusters and ranked by severity, then frequency.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  ingest  │──▶│  vectorize   │──▶│   data_dir    │
//! │ walk+cut │   │ cache+embed  │   │ snapshot+index│
//! └──────────┘   └──────────────┘   └───────┬───────┘
//!                                           ▼
//!                                   ┌───────────────┐
//!                                   │     query     │
//!                                   │ retrieve+rank │
//!                                   └───────────────┘
//! ```
//!
//! The algorithms (chunker, extractor, index, retriever, ranker) live in
//! `logsift-core`; this crate adds configuration, embedding providers, the
//! persistent cache and the commands.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`embedding`] | Embedding providers behind `logsift_core::Embedder` |
//! | [`cache`] | Content-addressed embedding cache |
//! | [`ingest`] | Log discovery and chunking into `chunks.jsonl` |
//! | [`vectorize`] | Pooled embedding, snapshots, index build |
//! | [`snapshot`] | Snapshot and index artifact naming |
//! | [`query`] | Retrieval, error clustering, JSON responses |
//! | [`stats`] | Data directory overview |
//! | [`progress`] | Progress reporting on stderr |

pub mod cache;
pub mod config;
pub mod embedding;
pub mod ingest;
pub mod progress;
pub mod query;
pub mod snapshot;
pub mod stats;
pub mod vectorize;
