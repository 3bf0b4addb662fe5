//! Retrieval-augmented generation core for workload-automation operational
//! documentation.
//!
//! The crate ingests documents (error references, runbooks, configuration
//! manuals), chunks and embeds them, persists them in a pgvector-backed
//! store, and serves two-stage semantic retrieval with cross-encoder
//! reranking and feedback-aware score adjustment. Transport (HTTP,
//! WebSocket, CLI) is a collaborator concern; this crate exposes the
//! services and the [`RagCore`] bundle that wires them together.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod metrics;
pub mod models;
pub mod services;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RagConfig;
use crate::error::Result;
use crate::interfaces::{Embedder, FeedbackSource, VectorStore};
use crate::services::{
    CrossEncoderReranker, EmbeddingRouter, FastembedExemplarEmbedder, FeedbackAwareRetriever,
    IngestService, MultiProviderEmbedder, OpinionBasedPromptFormatter, PgFeedbackStore,
    PgVectorStore,
};

pub use crate::config::RagConfig as Config;
pub use crate::error::{AppError, AppResult};

/// The initialized RAG core: store pool, embedder, ingest and retrieval
/// pipelines, reranker, intent router, and prompt formatter.
///
/// Holds the three process-wide singletons (store pool, cross-encoder,
/// intent cache) behind explicit init and teardown. The reranker and intent
/// router are optional at runtime; their degraded modes are first-class.
pub struct RagCore {
    pub config: RagConfig,
    pub embedder: Arc<MultiProviderEmbedder>,
    pub store: Arc<PgVectorStore>,
    pub feedback: Arc<PgFeedbackStore>,
    pub ingest: IngestService,
    pub retriever: FeedbackAwareRetriever,
    pub reranker: Arc<CrossEncoderReranker>,
    pub router: Option<EmbeddingRouter>,
    pub formatter: OpinionBasedPromptFormatter,
}

impl RagCore {
    /// Initialize every component against the configured database.
    ///
    /// Fatal on store connection or schema failures. A missing cross-encoder
    /// or router model is not fatal: those stages degrade per their
    /// contracts.
    pub async fn init(config: RagConfig) -> Result<Self> {
        let store = Arc::new(PgVectorStore::connect(&config).await?);
        let feedback = Arc::new(PgFeedbackStore::connect(store.pool().clone(), &config).await?);
        let embedder = Arc::new(MultiProviderEmbedder::from_config(&config));
        let reranker = Arc::new(CrossEncoderReranker::from_config(&config));

        if config.enable_cross_encoder && !reranker.preload().await {
            tracing::warn!("cross-encoder unavailable; reranking degrades to pass-through");
        }

        let dyn_embedder: Arc<dyn Embedder> = embedder.clone();
        let dyn_store: Arc<dyn VectorStore> = store.clone();
        let dyn_feedback: Arc<dyn FeedbackSource> = feedback.clone();

        let ingest = IngestService::new(
            dyn_embedder.clone(),
            dyn_store.clone(),
            config.embed_batch_size,
            config.collection_read.clone(),
            config.collection_write.clone(),
        );

        let retriever = FeedbackAwareRetriever::new(dyn_embedder, dyn_store, config.clone())
            .with_feedback(dyn_feedback)
            .with_reranker(reranker.clone());

        let router = match FastembedExemplarEmbedder::load(&config.router_embedding_model) {
            Ok(exemplar_embedder) => Some(EmbeddingRouter::new(
                Arc::new(exemplar_embedder),
                config.router_confidence_threshold,
                config.router_llm_fallback,
                config.router_cache_dir.as_ref().map(PathBuf::from),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "intent router unavailable");
                None
            }
        };

        Ok(Self {
            config,
            embedder,
            store,
            feedback,
            ingest,
            retriever,
            reranker,
            router,
            formatter: OpinionBasedPromptFormatter::new(),
        })
    }

    /// Refresh the `rag_collection_vectors` gauge from the read collection.
    pub async fn refresh_collection_gauge(&self) -> Result<()> {
        let count = self.store.count(&self.config.collection_read).await?;
        metrics::metrics().collection_vectors.set(count);
        Ok(())
    }

    /// Release the store pool. The model singletons live for the process.
    pub async fn shutdown(&self) {
        self.store.close().await;
        tracing::info!("rag core shut down");
    }
}
