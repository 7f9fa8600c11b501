//! # logsift core
//!
//! The retrieval-and-clustering engine behind logsift: windowed chunking,
//! multi-format error extraction with fingerprinting, a nearest-neighbour
//! vector index with size-driven topology, hybrid semantic + lexical
//! retrieval with a brute-force fallback, and severity-first cluster ranking.
//!
//! This crate does no configuration loading, no directory walking and owns
//! no async runtime. File I/O is limited to the index's own save/load
//! boundary. The embedding model is consumed through the [`Embedder`] trait.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Overlapping char/word/line windows, in-memory and streaming |
//! | [`extract`] | Format-specific error extractors, normalization, fingerprints, severity |
//! | [`index`] | Flat / inverted-file vector index, persistence, stats |
//! | [`retrieve`] | Query intent, hybrid scoring, fallback scan, underflow relaxation |
//! | [`cluster`] | Fingerprint clusters, ranking and budgeted selection |
//! | [`hints`] | Timeframe / class / method hints pulled from chunk text |
//! | [`embedding`] | `Embedder` trait and vector helpers |
//! | [`models`] | Shared data types |
//! | [`error`] | Error taxonomy |

pub mod chunk;
pub mod cluster;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod hints;
pub mod index;
pub mod models;
pub mod retrieve;

pub use embedding::Embedder;
pub use error::{Error, Result};
