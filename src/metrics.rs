//! Internal metrics for RAG observability.
//!
//! Owns a process-wide Prometheus registry with the latency histograms and
//! job counters emitted by the ingest and retrieval pipelines. A transport
//! collaborator exposes [`gather_text`] at its scrape endpoint.

use std::sync::OnceLock;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Process-wide metric handles.
pub struct RagMetrics {
    registry: Registry,

    /// Latency for embedding batches.
    pub embed_seconds: Histogram,
    /// Latency for vector upserts.
    pub upsert_seconds: Histogram,
    /// Latency for vector queries.
    pub query_seconds: Histogram,
    /// RAG jobs by status.
    pub jobs_total: IntCounterVec,
    /// Vectors in the current read collection.
    pub collection_vectors: IntGauge,
}

impl RagMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let embed_seconds = Histogram::with_opts(HistogramOpts::new(
            "rag_embed_seconds",
            "Latency for embedding batches",
        ))
        .expect("valid metric");

        let upsert_seconds = Histogram::with_opts(HistogramOpts::new(
            "rag_upsert_seconds",
            "Latency for vector upserts",
        ))
        .expect("valid metric");

        let query_seconds = Histogram::with_opts(HistogramOpts::new(
            "rag_query_seconds",
            "Latency for vector queries",
        ))
        .expect("valid metric");

        let jobs_total = IntCounterVec::new(Opts::new("rag_jobs_total", "RAG jobs"), &["status"])
            .expect("valid metric");

        let collection_vectors = IntGauge::new(
            "rag_collection_vectors",
            "Vectors in current read collection",
        )
        .expect("valid metric");

        registry
            .register(Box::new(embed_seconds.clone()))
            .expect("register");
        registry
            .register(Box::new(upsert_seconds.clone()))
            .expect("register");
        registry
            .register(Box::new(query_seconds.clone()))
            .expect("register");
        registry
            .register(Box::new(jobs_total.clone()))
            .expect("register");
        registry
            .register(Box::new(collection_vectors.clone()))
            .expect("register");

        Self {
            registry,
            embed_seconds,
            upsert_seconds,
            query_seconds,
            jobs_total,
            collection_vectors,
        }
    }
}

static METRICS: OnceLock<RagMetrics> = OnceLock::new();

/// Global metric handles, initialized on first use.
pub fn metrics() -> &'static RagMetrics {
    METRICS.get_or_init(RagMetrics::new)
}

/// Render all metrics in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_counter_increments() {
        let before = metrics().jobs_total.with_label_values(&["test"]).get();
        metrics().jobs_total.with_label_values(&["test"]).inc();
        let after = metrics().jobs_total.with_label_values(&["test"]).get();
        assert_eq!(after, before + 1);
    }

    #[test]
    fn test_histogram_observe() {
        metrics().embed_seconds.observe(0.05);
        assert!(metrics().embed_seconds.get_sample_count() >= 1);
    }

    #[test]
    fn test_gauge_set() {
        metrics().collection_vectors.set(42);
        assert_eq!(metrics().collection_vectors.get(), 42);
    }

    #[test]
    fn test_gather_text_contains_metric_names() {
        metrics().query_seconds.observe(0.01);
        let text = gather_text();
        assert!(text.contains("rag_query_seconds"));
        assert!(text.contains("rag_collection_vectors"));
    }
}
