//! Error taxonomy for the retrieval-and-clustering engine.
//!
//! Index-path variants ([`Error::IndexNotTrained`], [`Error::IndexFilesNotFound`],
//! [`Error::IndexCorrupt`], [`Error::DimensionMismatch`]) are recoverable at
//! query time: the retriever answers them with a brute-force scan. At build
//! time they propagate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad chunking or index parameters supplied by the caller.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The external embedding capability failed. Fatal for the request.
    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    /// A clustered index was searched or populated before training.
    #[error("index is not trained")]
    IndexNotTrained,

    #[error("index files not found: {}", .0.display())]
    IndexFilesNotFound(PathBuf),

    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No vectorize run has produced data to query against.
    #[error("no vector data found in {}", .0.display())]
    NoVectorDataFound(PathBuf),

    /// Some units of a batch failed; the rest completed.
    #[error("{failed} of {total} items failed")]
    PartialIngestFailure { failed: usize, total: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True for failures the query path recovers from with a fallback scan.
    pub fn is_index_path(&self) -> bool {
        matches!(
            self,
            Error::IndexNotTrained
                | Error::IndexFilesNotFound(_)
                | Error::IndexCorrupt(_)
                | Error::DimensionMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
