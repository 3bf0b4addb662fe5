//! Trait seams between the RAG components.
//!
//! The ingest and retrieval pipelines are wired against these traits rather
//! than concrete services so that collaborators can be swapped (and mocked in
//! tests) without touching the pipelines themselves.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::models::{SearchHit, UpsertRecord};

/// Embeds text into fixed-dimension vectors.
///
/// All vectors produced by one instance share the same `dimension`.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimension for this embedder.
    fn dimension(&self) -> usize;
}

/// Stores and retrieves vectors with metadata.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Durably upsert a batch of chunk records into `collection`.
    async fn upsert_batch(&self, records: &[UpsertRecord], collection: &str) -> Result<()>;

    /// Nearest-neighbor search ordered by descending similarity.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        collection: &str,
        filters: Option<&Value>,
        ef_search: Option<u32>,
        with_vectors: bool,
    ) -> Result<Vec<SearchHit>>;

    async fn count(&self, collection: &str) -> Result<i64>;

    async fn exists_by_sha256(&self, sha256: &str, collection: &str) -> Result<bool>;

    /// Delete all chunks of a document. Returns the number of rows removed.
    async fn delete_by_document_id(&self, document_id: &str, collection: &str) -> Result<u64>;
}

/// Feedback signals consumed by the retriever's reweighting stage.
#[async_trait]
pub trait FeedbackSource: Send + Sync {
    /// Exact-match aggregate for `(query, doc_id)`, optionally widened to
    /// similar stored queries via `query_embedding`. Zero when unknown.
    async fn get_query_feedback_score(
        &self,
        query: &str,
        doc_id: &str,
        query_embedding: Option<&[f32]>,
    ) -> Result<f32>;

    /// Document-level aggregates in [-1, 1], keyed by doc id.
    async fn get_document_scores_batch(
        &self,
        doc_ids: &[String],
    ) -> Result<std::collections::HashMap<String, f32>>;

    async fn record_feedback(
        &self,
        query: &str,
        doc_id: &str,
        rating: i16,
        user_id: Option<&str>,
        query_embedding: Option<&[f32]>,
    ) -> Result<bool>;

    /// Record several ratings for one query. Returns the number recorded.
    async fn record_batch_feedback(
        &self,
        query: &str,
        doc_ratings: &[(String, i16)],
        user_id: Option<&str>,
    ) -> Result<usize>;

    /// Total number of feedback events inside the retention window.
    async fn total_records(&self) -> Result<i64>;
}

/// Minimal text-generation interface consumed by the intent router fallback
/// and by prompt-formatter callers. The LLM client itself lives outside the
/// core.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}
