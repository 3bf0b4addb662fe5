//! Cross-encoder reranking for retrieved candidates.
//!
//! Two-stage retrieval: the HNSW scan is recall-oriented and fast; the
//! cross-encoder scores (query, candidate) pairs jointly for precision at
//! tens of milliseconds per batch. Candidate text is truncated to 512
//! characters to bound inference latency.
//!
//! The model is a process-wide singleton, lazily loaded off the async
//! runtime and warmed with a dummy pair. When the model cannot be loaded
//! the reranker degrades to an identity pass-through and reports
//! `model_used = "fallback"`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use tokio::sync::OnceCell;

use crate::config::RagConfig;
use crate::models::{RerankOutcome, RetrievedChunk};

/// Maximum candidate text length fed to the cross-encoder.
const MAX_CANDIDATE_CHARS: usize = 512;

static CROSS_ENCODER: OnceCell<Option<Arc<Mutex<TextRerank>>>> = OnceCell::const_new();

/// Map a configured model name onto a loadable cross-encoder.
fn resolve_model(name: &str) -> Option<RerankerModel> {
    match name {
        "BAAI/bge-reranker-base" | "bge-reranker-base" => Some(RerankerModel::BGERerankerBase),
        "jinaai/jina-reranker-v1-turbo-en" => Some(RerankerModel::JINARerankerV1TurboEn),
        "jinaai/jina-reranker-v2-base-multilingual" => {
            Some(RerankerModel::JINARerankerV2BaseMultiligual)
        }
        _ => None,
    }
}

fn load_model(name: &str) -> Option<TextRerank> {
    let model = resolve_model(name)?;
    let started = Instant::now();
    match TextRerank::try_new(RerankInitOptions::new(model)) {
        Ok(loaded) => {
            tracing::info!(
                model = name,
                load_ms = started.elapsed().as_millis() as u64,
                "cross-encoder loaded"
            );
            Some(loaded)
        }
        Err(e) => {
            tracing::error!(model = name, error = %e, "cross-encoder load failed");
            None
        }
    }
}

async fn get_cross_encoder(model_name: &str) -> Option<Arc<Mutex<TextRerank>>> {
    let name = model_name.to_string();
    CROSS_ENCODER
        .get_or_init(|| async move {
            let loaded = tokio::task::spawn_blocking(move || load_model(&name))
                .await
                .ok()
                .flatten();
            loaded.map(|m| Arc::new(Mutex::new(m)))
        })
        .await
        .clone()
}

/// Logistic normalization of a raw cross-encoder score into (0, 1).
pub fn sigmoid(score: f32) -> f32 {
    1.0 / (1.0 + (-score).exp())
}

/// Attach normalized scores, sort, threshold, and truncate.
///
/// `raw_scores[i]` is the raw model score for `candidates[i]`. The incoming
/// order becomes `original_rank` (1-based); the stable sort keeps it as the
/// tie-break.
pub(crate) fn apply_rerank_scores(
    mut candidates: Vec<RetrievedChunk>,
    raw_scores: &[f32],
    top_k: usize,
    threshold: f32,
) -> Vec<RetrievedChunk> {
    for (i, candidate) in candidates.iter_mut().enumerate() {
        let normalized = raw_scores.get(i).copied().map(sigmoid).unwrap_or(0.0);
        candidate.rerank_score = Some(normalized);
        candidate.original_rank = Some(i + 1);
        candidate.final_score = normalized;
    }

    candidates.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    candidates
        .into_iter()
        .filter(|c| c.rerank_score.unwrap_or(0.0) >= threshold)
        .take(top_k)
        .collect()
}

fn passthrough(
    candidates: Vec<RetrievedChunk>,
    top_k: usize,
    model_used: &str,
    started: Instant,
) -> RerankOutcome {
    let original_count = candidates.len();
    let documents: Vec<RetrievedChunk> = candidates.into_iter().take(top_k).collect();
    RerankOutcome {
        filtered_count: documents.len(),
        documents,
        rerank_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        model_used: model_used.to_string(),
        original_count,
    }
}

/// Cross-encoder rerank stage. Pure scoring: does not touch the store or
/// embedder.
pub struct CrossEncoderReranker {
    model_name: String,
    top_k: usize,
    threshold: f32,
}

impl CrossEncoderReranker {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            model_name: config.cross_encoder_model.clone(),
            top_k: config.cross_encoder_top_k,
            threshold: config.cross_encoder_threshold,
        }
    }

    /// Load and warm the model eagerly. Returns false when the model is
    /// unavailable and reranking will pass candidates through unchanged.
    pub async fn preload(&self) -> bool {
        let Some(model) = get_cross_encoder(&self.model_name).await else {
            return false;
        };

        let warmed = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().expect("reranker lock");
            guard
                .rerank("test query", vec!["test document"], false, None)
                .is_ok()
        })
        .await
        .unwrap_or(false);

        if warmed {
            tracing::info!("cross-encoder warmed up");
        } else {
            tracing::warn!("cross-encoder warm-up failed");
        }
        warmed
    }

    /// Rerank candidates for `query`.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> RerankOutcome {
        let started = Instant::now();
        let top_k = top_k.unwrap_or(self.top_k);
        let threshold = threshold.unwrap_or(self.threshold);
        let original_count = candidates.len();

        if candidates.is_empty() {
            return passthrough(candidates, top_k, "fallback", started);
        }

        let Some(model) = get_cross_encoder(&self.model_name).await else {
            return passthrough(candidates, top_k, "fallback", started);
        };

        let query_owned = query.to_string();
        let texts: Vec<String> = candidates
            .iter()
            .map(|c| c.content.chars().take(MAX_CANDIDATE_CHARS).collect())
            .collect();

        let scores = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().expect("reranker lock");
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            guard
                .rerank(query_owned.as_str(), refs, false, None)
                .map(|results| {
                    let mut by_index = vec![0.0f32; results.len()];
                    for result in results {
                        if result.index < by_index.len() {
                            by_index[result.index] = result.score;
                        }
                    }
                    by_index
                })
        })
        .await;

        let raw_scores = match scores {
            Ok(Ok(scores)) => scores,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "cross-encoder inference failed");
                return passthrough(candidates, top_k, "error_fallback", started);
            }
            Err(e) => {
                tracing::error!(error = %e, "cross-encoder task failed");
                return passthrough(candidates, top_k, "error_fallback", started);
            }
        };

        let documents = apply_rerank_scores(candidates, &raw_scores, top_k, threshold);
        let outcome = RerankOutcome {
            filtered_count: documents.len(),
            documents,
            rerank_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            model_used: self.model_name.clone(),
            original_count,
        };

        tracing::debug!(
            original = outcome.original_count,
            kept = outcome.filtered_count,
            time_ms = outcome.rerank_time_ms,
            "rerank complete"
        );
        outcome
    }
}
