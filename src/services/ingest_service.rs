//! Idempotent document ingestion.
//!
//! chunk -> dedup by SHA-256 of the normalized chunk -> batch embed ->
//! batch upsert. Re-ingesting the same text yields zero new chunks; partial
//! edits insert only the novel chunks, keyed by their position in the
//! original chunk sequence.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::interfaces::{Embedder, VectorStore};
use crate::metrics::metrics;
use crate::models::{chunk_id, ChunkPayload, UpsertRecord};
use crate::services::chunker::{Chunker, DEFAULT_MAX_TOKENS, DEFAULT_OVERLAP_TOKENS};

/// Arguments for one document ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub tenant: String,
    pub doc_id: String,
    pub source: String,
    pub text: String,
    /// ISO-8601 ingestion timestamp supplied by the caller.
    pub ts_iso: String,
    pub tags: Vec<String>,
    pub graph_version: i32,
}

/// Orchestrates chunking, dedup, embedding, and persistence.
pub struct IngestService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunker: Chunker,
    max_tokens: usize,
    overlap_tokens: usize,
    batch_size: usize,
    collection_read: String,
    collection_write: String,
}

impl IngestService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        batch_size: usize,
        collection_read: impl Into<String>,
        collection_write: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            chunker: Chunker::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
            batch_size: batch_size.max(1),
            collection_read: collection_read.into(),
            collection_write: collection_write.into(),
        }
    }

    /// Use the heuristic chunking strategy instead of the tokenizer.
    pub fn with_heuristic_chunker(mut self) -> Self {
        self.chunker = Chunker::heuristic();
        self
    }

    /// Override the chunk window and overlap.
    pub fn with_chunking(mut self, max_tokens: usize, overlap_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self.overlap_tokens = overlap_tokens;
        self
    }

    /// Ingest one document; returns the number of newly persisted chunks.
    ///
    /// Per-slice failures abort the document but leave earlier slices
    /// committed; a retry skips them through the dedup probe.
    pub async fn ingest_document(&self, request: IngestRequest) -> Result<usize> {
        let started = Instant::now();
        let chunks: Vec<String> = self
            .chunker
            .chunk(&request.text, self.max_tokens, self.overlap_tokens)
            .collect();
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut records: Vec<UpsertRecord> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for (i, chunk) in chunks.iter().enumerate() {
            let normalized = chunk.trim().to_string();
            let sha = hex::encode(Sha256::digest(normalized.as_bytes()));

            // Repeated chunk inside the same document; keep the first.
            if !seen.insert(sha.clone()) {
                continue;
            }

            if self
                .store
                .exists_by_sha256(&sha, &self.collection_read)
                .await?
            {
                continue;
            }

            let id = chunk_id(&request.doc_id, i);
            let payload = ChunkPayload {
                tenant: request.tenant.clone(),
                doc_id: request.doc_id.clone(),
                chunk_id: id.clone(),
                source: request.source.clone(),
                section: None,
                ts: request.ts_iso.clone(),
                tags: request.tags.clone(),
                neighbors: Vec::new(),
                graph_version: request.graph_version,
                sha256: sha.clone(),
            };

            records.push(UpsertRecord {
                chunk_id: id,
                document_id: request.doc_id.clone(),
                ordinal: i as i32,
                text: normalized,
                sha256: sha,
                vector: Vec::new(),
                metadata: payload.to_metadata(),
            });
        }

        if records.is_empty() {
            tracing::info!(doc_id = %request.doc_id, "no new chunks to ingest (dedup hit)");
            return Ok(0);
        }

        let mut total_upserted = 0usize;
        for slice in records.chunks_mut(self.batch_size) {
            let texts: Vec<String> = slice.iter().map(|r| r.text.clone()).collect();

            let timer = metrics().embed_seconds.start_timer();
            let vectors = self.embedder.embed_batch(&texts).await?;
            timer.observe_duration();

            for (record, vector) in slice.iter_mut().zip(vectors) {
                record.vector = vector;
            }

            let timer = metrics().upsert_seconds.start_timer();
            self.store
                .upsert_batch(slice, &self.collection_write)
                .await?;
            timer.observe_duration();

            total_upserted += slice.len();
        }

        metrics().jobs_total.with_label_values(&["ingested"]).inc();
        tracing::info!(
            doc_id = %request.doc_id,
            chunks = total_upserted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "document ingested"
        );

        Ok(total_upserted)
    }

    /// Purge every chunk of a document from the write collection.
    pub async fn delete_document(&self, doc_id: &str) -> Result<u64> {
        self.store
            .delete_by_document_id(doc_id, &self.collection_write)
            .await
    }
}
