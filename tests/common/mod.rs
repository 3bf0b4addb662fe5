//! Shared helpers for integration tests.
//!
//! This module provides in-memory implementations of the core trait seams:
//! - `HashEmbedder` – deterministic vectors, no network
//! - `MemoryStore` – a real in-memory vector store with dedup and cosine search
//! - `CannedStore` – returns preset hits and records the query arguments
//! - `MemoryFeedback` – feedback aggregates over an in-memory event log

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use opsrag::error::{AppError, Result};
use opsrag::interfaces::{Embedder, FeedbackSource, VectorStore};
use opsrag::models::{chunk_id, SearchHit, UpsertRecord};
use opsrag::services::{hash_vec, query_fingerprint};

// ---------------------------------------------------------------------------
// Embedders
// ---------------------------------------------------------------------------

/// Deterministic embedder backed by the hash-vector fallback.
pub struct HashEmbedder {
    pub dim: usize,
    pub batch_calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            batch_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vec(text, self.dim))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vec(t, self.dim)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Embedder that starts failing after a configured number of batches.
pub struct FlakyEmbedder {
    pub dim: usize,
    pub fail_after: usize,
    pub batch_calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn new(dim: usize, fail_after: usize) -> Self {
        Self {
            dim,
            fail_after,
            batch_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(hash_vec(text, self.dim))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.fail_after {
            return Err(AppError::EmbeddingProvider("provider outage".into()));
        }
        Ok(texts.iter().map(|t| hash_vec(t, self.dim)).collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

// ---------------------------------------------------------------------------
// Vector stores
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StoredChunk {
    pub collection: String,
    pub record: UpsertRecord,
}

/// In-memory vector store honoring the upsert/dedup/search contracts.
#[derive(Default)]
pub struct MemoryStore {
    pub chunks: Mutex<Vec<StoredChunk>>,
    pub upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a sha256 into a collection so ingest dedup will skip it.
    pub fn seed_sha(&self, sha256: &str, collection: &str) {
        self.chunks.lock().unwrap().push(StoredChunk {
            collection: collection.to_string(),
            record: UpsertRecord {
                chunk_id: "seed#c000000".into(),
                document_id: "seed".into(),
                ordinal: 0,
                text: String::new(),
                sha256: sha256.to_string(),
                vector: Vec::new(),
                metadata: Value::Null,
            },
        });
    }

    pub fn ordinals_for(&self, doc_id: &str, collection: &str) -> Vec<i32> {
        let mut ordinals: Vec<i32> = self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.collection == collection && c.record.document_id == doc_id)
            .map(|c| c.record.ordinal)
            .collect();
        ordinals.sort_unstable();
        ordinals
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert_batch(&self, records: &[UpsertRecord], collection: &str) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut chunks = self.chunks.lock().unwrap();
        for record in records {
            // Conflict on (collection, document_id, ordinal) updates in place.
            chunks.retain(|c| {
                !(c.collection == collection
                    && c.record.document_id == record.document_id
                    && c.record.ordinal == record.ordinal)
            });
            chunks.push(StoredChunk {
                collection: collection.to_string(),
                record: record.clone(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        collection: &str,
        _filters: Option<&Value>,
        _ef_search: Option<u32>,
        with_vectors: bool,
    ) -> Result<Vec<SearchHit>> {
        let chunks = self.chunks.lock().unwrap();
        let mut hits: Vec<SearchHit> = chunks
            .iter()
            .filter(|c| c.collection == collection && !c.record.vector.is_empty())
            .map(|c| SearchHit {
                id: chunk_id(&c.record.document_id, c.record.ordinal as usize),
                doc_id: c.record.document_id.clone(),
                ordinal: c.record.ordinal,
                content: c.record.text.clone(),
                metadata: c.record.metadata.clone(),
                sha256: c.record.sha256.clone(),
                similarity: cosine(vector, &c.record.vector),
                vector: with_vectors.then(|| c.record.vector.clone()),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.collection == collection)
            .count() as i64)
    }

    async fn exists_by_sha256(&self, sha256: &str, collection: &str) -> Result<bool> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .any(|c| c.collection == collection && c.record.sha256 == sha256))
    }

    async fn delete_by_document_id(&self, document_id: &str, collection: &str) -> Result<u64> {
        let mut chunks = self.chunks.lock().unwrap();
        let before = chunks.len();
        chunks.retain(|c| !(c.collection == collection && c.record.document_id == document_id));
        Ok((before - chunks.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Canned store for retriever pipelines
// ---------------------------------------------------------------------------

/// Arguments of the last `query` call.
#[derive(Clone, Debug)]
pub struct QueryArgs {
    pub top_k: usize,
    pub collection: String,
    pub ef_search: Option<u32>,
    pub with_vectors: bool,
}

/// Store returning preset hits, recording what was asked of it.
#[derive(Default)]
pub struct CannedStore {
    pub hits: Mutex<Vec<SearchHit>>,
    pub last_query: Mutex<Option<QueryArgs>>,
}

impl CannedStore {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            hits: Mutex::new(hits),
            last_query: Mutex::new(None),
        }
    }
}

/// Build a plain hit with the given doc id and similarity.
pub fn hit(doc_id: &str, similarity: f32) -> SearchHit {
    SearchHit {
        id: chunk_id(doc_id, 0),
        doc_id: doc_id.to_string(),
        ordinal: 0,
        content: format!("content of {doc_id}"),
        metadata: serde_json::json!({"doc_id": doc_id}),
        sha256: format!("sha-{doc_id}"),
        similarity,
        vector: None,
    }
}

#[async_trait]
impl VectorStore for CannedStore {
    async fn upsert_batch(&self, _records: &[UpsertRecord], _collection: &str) -> Result<()> {
        Ok(())
    }

    async fn query(
        &self,
        _vector: &[f32],
        top_k: usize,
        collection: &str,
        _filters: Option<&Value>,
        ef_search: Option<u32>,
        with_vectors: bool,
    ) -> Result<Vec<SearchHit>> {
        *self.last_query.lock().unwrap() = Some(QueryArgs {
            top_k,
            collection: collection.to_string(),
            ef_search,
            with_vectors,
        });
        let mut hits = self.hits.lock().unwrap().clone();
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, _collection: &str) -> Result<i64> {
        Ok(self.hits.lock().unwrap().len() as i64)
    }

    async fn exists_by_sha256(&self, _sha256: &str, _collection: &str) -> Result<bool> {
        Ok(false)
    }

    async fn delete_by_document_id(&self, _document_id: &str, _collection: &str) -> Result<u64> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// In-memory feedback source mirroring the store's aggregation semantics.
#[derive(Default)]
pub struct MemoryFeedback {
    pub events: Mutex<Vec<(String, String, i16)>>,
}

impl MemoryFeedback {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackSource for MemoryFeedback {
    async fn get_query_feedback_score(
        &self,
        query: &str,
        doc_id: &str,
        _query_embedding: Option<&[f32]>,
    ) -> Result<f32> {
        let fingerprint = query_fingerprint(query);
        let events = self.events.lock().unwrap();
        let ratings: Vec<i16> = events
            .iter()
            .filter(|(f, d, _)| *f == fingerprint && d == doc_id)
            .map(|(_, _, r)| *r)
            .collect();
        if ratings.is_empty() {
            return Ok(0.0);
        }
        Ok(ratings.iter().map(|r| *r as f32).sum::<f32>() / ratings.len() as f32)
    }

    async fn get_document_scores_batch(
        &self,
        doc_ids: &[String],
    ) -> Result<HashMap<String, f32>> {
        let events = self.events.lock().unwrap();
        let mut scores = HashMap::new();
        for doc_id in doc_ids {
            let (mut pos, mut neg) = (0i64, 0i64);
            for (_, _, r) in events.iter().filter(|(_, d, _)| d == doc_id) {
                if *r > 0 {
                    pos += 1;
                } else if *r < 0 {
                    neg += 1;
                }
            }
            if pos + neg > 0 {
                scores.insert(doc_id.clone(), (pos - neg) as f32 / (pos + neg) as f32);
            }
        }
        Ok(scores)
    }

    async fn record_feedback(
        &self,
        query: &str,
        doc_id: &str,
        rating: i16,
        _user_id: Option<&str>,
        _query_embedding: Option<&[f32]>,
    ) -> Result<bool> {
        self.events
            .lock()
            .unwrap()
            .push((query_fingerprint(query), doc_id.to_string(), rating));
        Ok(true)
    }

    async fn record_batch_feedback(
        &self,
        query: &str,
        doc_ratings: &[(String, i16)],
        _user_id: Option<&str>,
    ) -> Result<usize> {
        let fingerprint = query_fingerprint(query);
        let mut events = self.events.lock().unwrap();
        for (doc_id, rating) in doc_ratings {
            events.push((fingerprint.clone(), doc_id.clone(), *rating));
        }
        Ok(doc_ratings.len())
    }

    async fn total_records(&self) -> Result<i64> {
        Ok(self.events.lock().unwrap().len() as i64)
    }
}

/// Feedback source that always fails; retrieval must degrade gracefully.
pub struct FailingFeedback;

#[async_trait]
impl FeedbackSource for FailingFeedback {
    async fn get_query_feedback_score(
        &self,
        _query: &str,
        _doc_id: &str,
        _query_embedding: Option<&[f32]>,
    ) -> Result<f32> {
        Err(AppError::FeedbackStore("feedback store down".into()))
    }

    async fn get_document_scores_batch(
        &self,
        _doc_ids: &[String],
    ) -> Result<HashMap<String, f32>> {
        Err(AppError::FeedbackStore("feedback store down".into()))
    }

    async fn record_feedback(
        &self,
        _query: &str,
        _doc_id: &str,
        _rating: i16,
        _user_id: Option<&str>,
        _query_embedding: Option<&[f32]>,
    ) -> Result<bool> {
        Err(AppError::FeedbackStore("feedback store down".into()))
    }

    async fn record_batch_feedback(
        &self,
        _query: &str,
        _doc_ratings: &[(String, i16)],
        _user_id: Option<&str>,
    ) -> Result<usize> {
        Err(AppError::FeedbackStore("feedback store down".into()))
    }

    async fn total_records(&self) -> Result<i64> {
        Err(AppError::FeedbackStore("feedback store down".into()))
    }
}
