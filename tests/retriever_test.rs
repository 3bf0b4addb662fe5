//! Integration tests for the retrieval pipeline.
//!
//! Exercise clamping, search-effort mapping, oversampling, feedback
//! reweighting, and degraded modes against in-memory collaborators.

mod common;

use std::sync::Arc;

use common::{hit, CannedStore, FailingFeedback, HashEmbedder, MemoryFeedback, MemoryStore};
use opsrag::config::RagConfig;
use opsrag::services::{FeedbackAwareRetriever, IngestService};

fn test_config() -> RagConfig {
    let mut config = RagConfig::for_database("postgres://unused/test");
    config.enable_cross_encoder = false;
    config
}

fn retriever_over(store: Arc<CannedStore>) -> FeedbackAwareRetriever {
    FeedbackAwareRetriever::new(Arc::new(HashEmbedder::new(32)), store, test_config())
}

// ---------------------------------------------------------------------------
// Basic pipeline behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn results_preserve_store_order_without_stages() {
    let store = Arc::new(CannedStore::with_hits(vec![
        hit("A", 0.95),
        hit("B", 0.85),
        hit("C", 0.75),
    ]));
    let retriever = retriever_over(store.clone());

    let results = retriever.retrieve("query", 3, None, false, None).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    for result in &results {
        assert_eq!(result.final_score, result.base_score);
        assert!(!result.has_feedback);
    }
}

#[tokio::test]
async fn store_receives_read_collection_and_ef_search() {
    let store = Arc::new(CannedStore::with_hits(vec![hit("A", 0.9)]));
    let retriever = retriever_over(store.clone());

    retriever.retrieve("query", 3, None, false, None).await.unwrap();

    let args = store.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(args.collection, "knowledge_v1");
    // ef = 64 + log2(10) * 8 = 90 for small top_k
    assert_eq!(args.ef_search, Some(90));
    assert!(!args.with_vectors);
    assert_eq!(args.top_k, 3);
}

#[tokio::test]
async fn top_k_is_clamped_to_max() {
    let store = Arc::new(CannedStore::with_hits(vec![hit("A", 0.9)]));
    let retriever = retriever_over(store.clone());

    retriever.retrieve("query", 1000, None, false, None).await.unwrap();

    let args = store.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(args.top_k, 50, "top_k must be silently clamped to max_top_k");
    assert_eq!(args.ef_search, Some(128), "ef_search is capped at ef_search_max");
}

#[tokio::test]
async fn feedback_stage_oversamples_candidates() {
    let store = Arc::new(CannedStore::with_hits(vec![hit("A", 0.9)]));
    let retriever = FeedbackAwareRetriever::new(
        Arc::new(HashEmbedder::new(32)),
        store.clone(),
        test_config(),
    )
    .with_feedback(Arc::new(MemoryFeedback::new()));

    let results = retriever.retrieve("query", 5, None, true, None).await.unwrap();
    assert_eq!(results.len(), 1);

    let args = store.last_query.lock().unwrap().clone().unwrap();
    assert_eq!(args.top_k, 15, "retrieve_k = top_k * 3 when feedback is on");
}

#[tokio::test]
async fn empty_store_yields_empty_results() {
    let store = Arc::new(CannedStore::with_hits(vec![]));
    let retriever = retriever_over(store);
    let results = retriever.retrieve("query", 5, None, false, None).await.unwrap();
    assert!(results.is_empty());
}

// ---------------------------------------------------------------------------
// Feedback loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn implicit_selection_lifts_selected_document() {
    let store = Arc::new(CannedStore::with_hits(vec![
        hit("A", 0.8),
        hit("B", 0.8),
        hit("C", 0.8),
    ]));
    let feedback = Arc::new(MemoryFeedback::new());
    let retriever = FeedbackAwareRetriever::new(
        Arc::new(HashEmbedder::new(32)),
        store,
        test_config(),
    )
    .with_feedback(feedback.clone())
    .with_fixed_weight();

    let shown: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
    let recorded = retriever
        .record_implicit_feedback("how to restart job?", "B", &shown, None)
        .await
        .unwrap();
    assert_eq!(recorded, 3);

    let results = retriever
        .retrieve("how to restart job?", 3, None, true, None)
        .await
        .unwrap();

    assert_eq!(results[0].doc_id, "B");
    let by_doc = |d: &str| results.iter().find(|r| r.doc_id == d).unwrap();
    assert!(by_doc("B").final_score > by_doc("A").final_score);
    assert!(by_doc("B").final_score > by_doc("C").final_score);
    assert!(by_doc("B").has_feedback);
    assert!(by_doc("B").feedback_boost > 0.0);
    assert!(by_doc("A").feedback_boost < 0.0);
}

#[tokio::test]
async fn explicit_feedback_is_recorded_with_embedding() {
    let feedback = Arc::new(MemoryFeedback::new());
    let retriever = FeedbackAwareRetriever::new(
        Arc::new(HashEmbedder::new(32)),
        Arc::new(CannedStore::with_hits(vec![])),
        test_config(),
    )
    .with_feedback(feedback.clone());

    let recorded = retriever
        .record_feedback("what is RC 12?", "D7", 1, Some("user-1"))
        .await
        .unwrap();
    assert!(recorded);
    assert_eq!(feedback.events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn feedback_outage_degrades_to_unweighted_results() {
    let store = Arc::new(CannedStore::with_hits(vec![hit("A", 0.9), hit("B", 0.8)]));
    let retriever = FeedbackAwareRetriever::new(
        Arc::new(HashEmbedder::new(32)),
        store,
        test_config(),
    )
    .with_feedback(Arc::new(FailingFeedback));

    let results = retriever.retrieve("query", 2, None, true, None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].doc_id, "A");
    for result in &results {
        assert_eq!(result.final_score, result.base_score);
        assert!(!result.has_feedback);
    }
}

#[tokio::test]
async fn stats_count_retrievals_and_feedback_passes() {
    let store = Arc::new(CannedStore::with_hits(vec![hit("A", 0.9)]));
    let feedback = Arc::new(MemoryFeedback::new());
    let retriever = FeedbackAwareRetriever::new(
        Arc::new(HashEmbedder::new(32)),
        store,
        test_config(),
    )
    .with_feedback(feedback);

    retriever.retrieve("q1", 1, None, false, None).await.unwrap();
    retriever.retrieve("q2", 1, None, true, None).await.unwrap();

    let stats = retriever.stats();
    assert_eq!(stats.total_retrievals, 2);
    assert_eq!(stats.feedback_applied_count, 1);
    assert!((stats.feedback_application_rate - 0.5).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Ingest + retrieve round trip over the in-memory store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingested_chunk_is_retrievable_by_its_text() {
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashEmbedder::new(64));

    let ingest = IngestService::new(
        embedder.clone(),
        store.clone(),
        8,
        "knowledge_v1",
        "knowledge_v1",
    )
    .with_heuristic_chunker()
    .with_chunking(16, 4);

    let text = "TWS Error AWSJR0001E indicates a job dependency cycle. \
                To resolve: identify the cycle; remove one dependency; restart.";
    let inserted = ingest
        .ingest_document(opsrag::services::IngestRequest {
            tenant: "test".into(),
            doc_id: "D1".into(),
            source: "errors.md".into(),
            text: text.into(),
            ts_iso: "2025-10-18T00:00:00Z".into(),
            tags: vec![],
            graph_version: 1,
        })
        .await
        .unwrap();
    assert!((2..=3).contains(&inserted), "got {inserted} chunks");

    // Hash embeddings are non-semantic: querying with the exact text of the
    // first chunk makes its vector identical and the match exact.
    let first_chunk = "TWS Error AWSJR0001E indicates a job dependency cycle.";
    let retriever = FeedbackAwareRetriever::new(embedder, store, test_config());
    let results = retriever.retrieve(first_chunk, 3, None, false, None).await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].doc_id, "D1");
    assert!(results[0].base_score > 0.999);
    assert_eq!(
        results[0].metadata.get("doc_id").and_then(|v| v.as_str()),
        Some("D1")
    );
    assert!(!results[0].sha256.is_empty());
}
