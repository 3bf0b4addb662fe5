//! Retrieval result models.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A retrieved chunk with the full score breakdown.
///
/// `base_score` is always the ANN cosine similarity. When the cross-encoder
/// stage ran, `rerank_score` carries its normalized score and becomes the
/// pre-feedback ranking score; `final_score` is the post-feedback value the
/// list is ordered by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub doc_id: String,
    pub content: String,
    pub metadata: Value,
    pub sha256: String,
    pub base_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    /// 1-based rank before the cross-encoder reordered the list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_rank: Option<usize>,
    pub feedback_score: f32,
    pub feedback_boost: f32,
    pub final_score: f32,
    pub has_feedback: bool,
    #[serde(skip)]
    pub vector: Option<Vec<f32>>,
}

impl RetrievedChunk {
    /// Build a chunk straight from a store hit, before any reranking.
    pub fn from_hit(hit: crate::models::SearchHit) -> Self {
        Self {
            id: hit.id,
            doc_id: hit.doc_id,
            content: hit.content,
            metadata: hit.metadata,
            sha256: hit.sha256,
            base_score: hit.similarity,
            rerank_score: None,
            original_rank: None,
            feedback_score: 0.0,
            feedback_boost: 0.0,
            final_score: hit.similarity,
            has_feedback: false,
            vector: hit.vector,
        }
    }
}

/// Outcome of a cross-encoder rerank pass.
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub documents: Vec<RetrievedChunk>,
    pub rerank_time_ms: f64,
    pub model_used: String,
    pub original_count: usize,
    pub filtered_count: usize,
}

/// Retriever counters exposed for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RetrieverStats {
    pub total_retrievals: u64,
    pub feedback_applied_count: u64,
    pub feedback_application_rate: f64,
    pub feedback_weight: f32,
    pub min_boost: f32,
    pub max_boost: f32,
}
