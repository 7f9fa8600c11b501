//! Data types shared between ingest, vectorize and query.
//!
//! Ingest-scoped: [`Chunk`]. Persisted with vectors: [`ChunkMetadata`],
//! [`EmbeddedChunk`]. Query-scoped: [`ErrorEvent`], [`RetrievedItem`].

use serde::{Deserialize, Serialize};

/// A window of source text. Identity is `(source_path, sequence_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_path: String,
    pub sequence_index: usize,
}

/// Auxiliary fields stored alongside each indexed vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Relative path of the log file the chunk came from.
    pub path: String,
    #[serde(default)]
    pub chunk_index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe_end: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_types: Vec<String>,
    #[serde(default)]
    pub has_errors: bool,
}

/// One record of a vector snapshot: chunk metadata plus its embedding.
///
/// Serializes flat, as `{path, text, vector, ...metadata}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
}

/// A structured error pulled out of raw log text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEvent {
    /// Hex SHA-256 truncated to 160 bits over the normalized signature.
    pub fingerprint: String,
    pub error_type: String,
    /// First line of the block, trimmed.
    pub message: String,
    /// The raw block, at most [`crate::extract::EXCERPT_LIMIT`] chars.
    pub excerpt: String,
    pub source_path: Option<String>,
}

/// A scored chunk (or synthetic pattern snippet) returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub score: f64,
    pub semantic: f64,
    pub lexical: f64,
    pub path: String,
    #[serde(rename = "chunk")]
    pub chunk_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_chunk_serializes_flat() {
        let entry = EmbeddedChunk {
            metadata: ChunkMetadata {
                path: "app.log".into(),
                text: "boom".into(),
                has_errors: true,
                ..Default::default()
            },
            vector: vec![0.5, 0.25],
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["path"], "app.log");
        assert_eq!(json["text"], "boom");
        assert_eq!(json["has_errors"], true);
        assert_eq!(json["vector"][1], 0.25);
        assert!(json.get("classes").is_none());

        let back: EmbeddedChunk = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }
}
