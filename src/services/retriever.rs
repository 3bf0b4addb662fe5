//! Feedback-aware retrieval pipeline.
//!
//! Pipeline per query: clamp top_k -> embed -> ANN search (oversampled x3
//! when a later stage will reorder) -> cross-encoder rerank -> feedback
//! reweight -> legacy cosine re-sort -> truncate.
//!
//! Scoring: `base_score` is the ANN cosine similarity. When the
//! cross-encoder ran, its normalized score becomes the pre-feedback ranking
//! score; feedback multiplies that by `(1 + clamp(weight * feedback_score))`.
//! Ties preserve the order the store returned.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::config::RagConfig;
use crate::error::Result;
use crate::interfaces::{Embedder, FeedbackSource, VectorStore};
use crate::metrics::metrics;
use crate::models::{
    RetrievedChunk, RetrieverStats, FEEDBACK_NEGATIVE, FEEDBACK_POSITIVE,
};
use crate::services::reranker::CrossEncoderReranker;

/// How many of the leading non-selected results implicit feedback penalizes.
const IMPLICIT_PENALTY_WINDOW: usize = 3;

/// Clamped feedback boost and the resulting final score.
pub(crate) fn boosted_score(
    pre_score: f32,
    feedback_score: f32,
    weight: f32,
    min_boost: f32,
    max_boost: f32,
) -> (f32, f32) {
    let boost = (weight * feedback_score).clamp(min_boost, max_boost);
    (boost, pre_score * (1.0 + boost))
}

/// Adaptive weight: scaled down until enough feedback has accumulated.
pub(crate) fn adaptive_weight(base: f32, total_records: i64, min_for_full_weight: i64) -> f32 {
    if min_for_full_weight <= 0 || total_records >= min_for_full_weight {
        return base;
    }
    base * (total_records.max(0) as f32 / min_for_full_weight as f32)
}

/// Implicit-feedback ratings for a selection: +1 for the selected document,
/// -1 for non-selected documents among the first three shown. Documents
/// further down receive no signal.
pub(crate) fn implicit_feedback_pairs(
    selected_doc_id: &str,
    shown_doc_ids: &[String],
) -> Vec<(String, i16)> {
    let mut pairs = Vec::new();
    for (i, doc_id) in shown_doc_ids.iter().enumerate() {
        if doc_id == selected_doc_id {
            pairs.push((doc_id.clone(), FEEDBACK_POSITIVE));
        } else if i < IMPLICIT_PENALTY_WINDOW {
            pairs.push((doc_id.clone(), FEEDBACK_NEGATIVE));
        }
    }
    pairs
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Stable descending sort by final score; store order breaks ties.
pub(crate) fn resort_by_final(chunks: &mut [RetrievedChunk]) {
    chunks.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Retriever with cross-encoder and feedback-aware reranking stages.
pub struct FeedbackAwareRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    feedback: Option<Arc<dyn FeedbackSource>>,
    reranker: Option<Arc<CrossEncoderReranker>>,
    config: RagConfig,
    adaptive: bool,
    min_feedback_for_full_weight: i64,

    retrieval_count: AtomicU64,
    feedback_applied_count: AtomicU64,
}

impl FeedbackAwareRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>, config: RagConfig) -> Self {
        Self {
            embedder,
            store,
            feedback: None,
            reranker: None,
            config,
            adaptive: true,
            min_feedback_for_full_weight: 10,
            retrieval_count: AtomicU64::new(0),
            feedback_applied_count: AtomicU64::new(0),
        }
    }

    pub fn with_feedback(mut self, feedback: Arc<dyn FeedbackSource>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<CrossEncoderReranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Disable the adaptive feedback weight (use the configured weight
    /// regardless of feedback density).
    pub fn with_fixed_weight(mut self) -> Self {
        self.adaptive = false;
        self
    }

    /// Retrieve chunks for `query`, reranked and reweighted.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filters: Option<&Value>,
        apply_feedback: bool,
        user_id: Option<&str>,
    ) -> Result<Vec<RetrievedChunk>> {
        let _ = user_id; // reserved for personalized feedback
        let top_k = top_k.min(self.config.max_top_k);
        self.retrieval_count.fetch_add(1, Ordering::Relaxed);

        let query_embedding = self.embedder.embed(query).await?;
        let ef_search = self.config.ef_search_for(top_k);

        let reranker = if self.config.enable_cross_encoder {
            self.reranker.clone()
        } else {
            None
        };
        let feedback = if apply_feedback {
            self.feedback.clone()
        } else {
            None
        };

        let retrieve_k = if reranker.is_some() || feedback.is_some() {
            (top_k * 3).min(self.config.max_top_k)
        } else {
            top_k
        };

        let timer = metrics().query_seconds.start_timer();
        let hits = self
            .store
            .query(
                &query_embedding,
                retrieve_k,
                &self.config.collection_read,
                filters,
                Some(ef_search),
                self.config.enable_rerank,
            )
            .await?;
        timer.observe_duration();

        let mut chunks: Vec<RetrievedChunk> =
            hits.into_iter().map(RetrievedChunk::from_hit).collect();
        if chunks.is_empty() {
            return Ok(chunks);
        }

        if let Some(reranker) = &reranker {
            let outcome = reranker.rerank(query, chunks, Some(top_k), None).await;
            chunks = outcome.documents;
        }

        if let Some(feedback) = &feedback {
            match self
                .apply_feedback(feedback.as_ref(), &mut chunks, query, &query_embedding)
                .await
            {
                Ok(()) => {
                    self.feedback_applied_count.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // Feedback failures degrade to unweighted results.
                    tracing::warn!(error = %e, "feedback reweighting skipped");
                }
            }
        }

        if self.config.enable_rerank {
            self.cosine_resort(&mut chunks, &query_embedding);
        }

        chunks.truncate(top_k);
        Ok(chunks)
    }

    /// Reweight `chunks` in place by feedback scores and re-sort.
    async fn apply_feedback(
        &self,
        feedback: &dyn FeedbackSource,
        chunks: &mut Vec<RetrievedChunk>,
        query: &str,
        query_embedding: &[f32],
    ) -> Result<()> {
        let weight = if self.adaptive {
            let total = feedback.total_records().await?;
            adaptive_weight(
                self.config.feedback_weight,
                total,
                self.min_feedback_for_full_weight,
            )
        } else {
            self.config.feedback_weight
        };

        let doc_ids: Vec<String> = chunks.iter().map(|c| c.doc_id.clone()).collect();
        let doc_scores: HashMap<String, f32> =
            feedback.get_document_scores_batch(&doc_ids).await?;

        for chunk in chunks.iter_mut() {
            let mut score = feedback
                .get_query_feedback_score(query, &chunk.doc_id, Some(query_embedding))
                .await?;
            if score == 0.0 {
                score = doc_scores.get(&chunk.doc_id).copied().unwrap_or(0.0);
            }

            let pre_score = chunk.rerank_score.unwrap_or(chunk.base_score);
            let (boost, final_score) = boosted_score(
                pre_score,
                score,
                weight,
                self.config.feedback_min_boost,
                self.config.feedback_max_boost,
            );

            chunk.feedback_score = score;
            chunk.feedback_boost = boost;
            chunk.final_score = final_score;
            chunk.has_feedback = score != 0.0;
        }

        resort_by_final(chunks);

        tracing::debug!(
            hits = chunks.len(),
            with_feedback = chunks.iter().filter(|c| c.has_feedback).count(),
            "feedback reweighting applied"
        );
        Ok(())
    }

    /// Legacy re-sort blending the current score with query-vector cosine.
    fn cosine_resort(&self, chunks: &mut [RetrievedChunk], query_embedding: &[f32]) {
        let mut any = false;
        for chunk in chunks.iter_mut() {
            if let Some(vector) = &chunk.vector {
                chunk.final_score =
                    chunk.final_score * 0.7 + cosine(query_embedding, vector) * 0.3;
                any = true;
            }
        }
        if any {
            resort_by_final(chunks);
        }
    }

    /// Record explicit feedback for a query/document pair.
    pub async fn record_feedback(
        &self,
        query: &str,
        doc_id: &str,
        rating: i16,
        user_id: Option<&str>,
    ) -> Result<bool> {
        let Some(feedback) = &self.feedback else {
            return Ok(false);
        };
        let query_embedding = self.embedder.embed(query).await?;
        feedback
            .record_feedback(query, doc_id, rating, user_id, Some(&query_embedding))
            .await
    }

    /// Record implicit feedback from a user selection: the selected document
    /// is a positive signal, its immediate competitors a mild negative one.
    pub async fn record_implicit_feedback(
        &self,
        query: &str,
        selected_doc_id: &str,
        shown_doc_ids: &[String],
        user_id: Option<&str>,
    ) -> Result<usize> {
        let Some(feedback) = &self.feedback else {
            return Ok(0);
        };
        let pairs = implicit_feedback_pairs(selected_doc_id, shown_doc_ids);
        if pairs.is_empty() {
            return Ok(0);
        }
        feedback.record_batch_feedback(query, &pairs, user_id).await
    }

    pub fn stats(&self) -> RetrieverStats {
        let total = self.retrieval_count.load(Ordering::Relaxed);
        let applied = self.feedback_applied_count.load(Ordering::Relaxed);
        RetrieverStats {
            total_retrievals: total,
            feedback_applied_count: applied,
            feedback_application_rate: if total > 0 {
                applied as f64 / total as f64
            } else {
                0.0
            },
            feedback_weight: self.config.feedback_weight,
            min_boost: self.config.feedback_min_boost,
            max_boost: self.config.feedback_max_boost,
        }
    }
}
