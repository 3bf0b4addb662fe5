//! Chunk models for ingestion and vector storage.
//!
//! A chunk is an immutable, token-bounded fragment of a document carrying its
//! own embedding. Chunks are created by ingestion, owned by the vector store,
//! and deleted only by document-level purge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload persisted alongside each chunk embedding.
///
/// `sha256` and the chunk ordinal are stored as first-class columns; the rest
/// lands in the store's JSONB metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub tenant: String,
    pub doc_id: String,
    pub chunk_id: String,
    pub source: String,
    pub section: Option<String>,
    pub ts: String,
    pub tags: Vec<String>,
    pub neighbors: Vec<String>,
    pub graph_version: i32,
    pub sha256: String,
}

impl ChunkPayload {
    /// Metadata object for the store: the payload minus the fields that are
    /// first-class columns (`sha256`).
    pub fn to_metadata(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| Value::Null);
        if let Value::Object(ref mut map) = value {
            map.remove("sha256");
        }
        value
    }
}

/// One chunk ready for upsert: identity, text, vector, and payload.
#[derive(Debug, Clone)]
pub struct UpsertRecord {
    /// Deterministic chunk id: `"{doc_id}#c{ordinal:06}"`.
    pub chunk_id: String,
    pub document_id: String,
    /// Position of the chunk in the original chunk sequence of its document.
    pub ordinal: i32,
    pub text: String,
    pub sha256: String,
    pub vector: Vec<f32>,
    pub metadata: Value,
}

/// A nearest-neighbor hit returned by the vector store.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Chunk id (`"{doc_id}#c{ordinal:06}"`).
    pub id: String,
    pub doc_id: String,
    pub ordinal: i32,
    pub content: String,
    pub metadata: Value,
    pub sha256: String,
    /// Cosine similarity in [-1, 1]: `1 - distance`.
    pub similarity: f32,
    /// Present only when the query requested vectors.
    pub vector: Option<Vec<f32>>,
}

/// Deterministic chunk id for a document position.
pub fn chunk_id(doc_id: &str, ordinal: usize) -> String {
    format!("{}#c{:06}", doc_id, ordinal)
}
