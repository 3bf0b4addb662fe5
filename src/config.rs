use anyhow::Result;
use secrecy::SecretString;
use serde::Deserialize;

/// Application configuration loaded from environment variables
#[derive(Clone, Deserialize)]
pub struct RagConfig {
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub database_min_connections: u32,

    /// Per-call timeout, seconds, for acquiring a pooled connection.
    #[serde(default = "default_pool_timeout_secs")]
    pub database_timeout_secs: u64,

    /// Collection receiving new chunks.
    #[serde(default = "default_collection")]
    pub collection_write: String,

    /// Collection served to queries. Differs from `collection_write` during
    /// a blue/green re-embed.
    #[serde(default = "default_collection")]
    pub collection_read: String,

    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,

    pub embed_api_key: Option<SecretString>,

    pub embed_api_base: Option<String>,

    #[serde(default = "default_batch_size")]
    pub embed_batch_size: usize,

    #[serde(default = "default_retry_attempts")]
    pub embed_retry_attempts: u32,

    /// When true, a batch that exhausts retries falls back to deterministic
    /// hash vectors instead of failing the call.
    #[serde(default)]
    pub embed_lenient: bool,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    // HNSW index build parameters (used at CREATE INDEX)
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u32,

    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: u32,

    // Query-time search-effort bounds
    #[serde(default = "default_ef_search_base")]
    pub ef_search_base: u32,

    #[serde(default = "default_ef_search_max")]
    pub ef_search_max: u32,

    /// Legacy cosine re-sort stage in the retriever.
    #[serde(default)]
    pub enable_rerank: bool,

    // Cross-encoder rerank stage
    #[serde(default = "default_true")]
    pub enable_cross_encoder: bool,

    #[serde(default = "default_cross_encoder_model")]
    pub cross_encoder_model: String,

    #[serde(default = "default_cross_encoder_top_k")]
    pub cross_encoder_top_k: usize,

    #[serde(default = "default_cross_encoder_threshold")]
    pub cross_encoder_threshold: f32,

    // Feedback reweighting
    #[serde(default = "default_feedback_weight")]
    pub feedback_weight: f32,

    #[serde(default = "default_min_boost")]
    pub feedback_min_boost: f32,

    #[serde(default = "default_max_boost")]
    pub feedback_max_boost: f32,

    #[serde(default = "default_retention_days")]
    pub feedback_retention_days: u32,

    // Intent router
    #[serde(default = "default_router_model")]
    pub router_embedding_model: String,

    #[serde(default = "default_router_threshold")]
    pub router_confidence_threshold: f32,

    #[serde(default = "default_true")]
    pub router_llm_fallback: bool,

    /// Directory for the on-disk intent embedding cache. None disables it.
    pub router_cache_dir: Option<String>,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_pool_timeout_secs() -> u64 {
    60
}

fn default_collection() -> String {
    "knowledge_v1".to_string()
}

fn default_embed_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embed_dim() -> usize {
    1536
}

fn default_batch_size() -> usize {
    128
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_max_top_k() -> usize {
    50
}

fn default_hnsw_m() -> u32 {
    16
}

fn default_hnsw_ef_construction() -> u32 {
    256
}

fn default_ef_search_base() -> u32 {
    64
}

fn default_ef_search_max() -> u32 {
    128
}

fn default_true() -> bool {
    true
}

fn default_cross_encoder_model() -> String {
    "BAAI/bge-reranker-base".to_string()
}

fn default_cross_encoder_top_k() -> usize {
    5
}

fn default_cross_encoder_threshold() -> f32 {
    0.3
}

fn default_feedback_weight() -> f32 {
    0.3
}

fn default_min_boost() -> f32 {
    -0.5
}

fn default_max_boost() -> f32 {
    0.5
}

fn default_retention_days() -> u32 {
    180
}

fn default_router_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_router_threshold() -> f32 {
    0.75
}

impl RagConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Build a default configuration for the given database URL.
    ///
    /// Used by tests and embedding callers that configure programmatically.
    pub fn for_database(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            database_max_connections: default_max_connections(),
            database_min_connections: default_min_connections(),
            database_timeout_secs: default_pool_timeout_secs(),
            collection_write: default_collection(),
            collection_read: default_collection(),
            embed_model: default_embed_model(),
            embed_dim: default_embed_dim(),
            embed_api_key: None,
            embed_api_base: None,
            embed_batch_size: default_batch_size(),
            embed_retry_attempts: default_retry_attempts(),
            embed_lenient: false,
            max_top_k: default_max_top_k(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
            ef_search_base: default_ef_search_base(),
            ef_search_max: default_ef_search_max(),
            enable_rerank: false,
            enable_cross_encoder: true,
            cross_encoder_model: default_cross_encoder_model(),
            cross_encoder_top_k: default_cross_encoder_top_k(),
            cross_encoder_threshold: default_cross_encoder_threshold(),
            feedback_weight: default_feedback_weight(),
            feedback_min_boost: default_min_boost(),
            feedback_max_boost: default_max_boost(),
            feedback_retention_days: default_retention_days(),
            router_embedding_model: default_router_model(),
            router_confidence_threshold: default_router_threshold(),
            router_llm_fallback: true,
            router_cache_dir: None,
        }
    }

    /// Target `ef_search` for a query, scaled by `top_k` and clamped to the
    /// configured bounds.
    pub fn ef_search_for(&self, top_k: usize) -> u32 {
        let scaled = (top_k.max(10) as f64).log2() * 8.0;
        let ef = self.ef_search_base + scaled as u32;
        ef.clamp(self.ef_search_base, self.ef_search_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config() -> RagConfig {
        RagConfig::for_database("postgres://localhost/test")
    }

    #[test]
    fn test_default_collections_match() {
        let config = make_config();
        assert_eq!(config.collection_write, config.collection_read);
        assert_eq!(config.collection_write, "knowledge_v1");
    }

    #[test]
    fn test_default_embedding_settings() {
        let config = make_config();
        assert_eq!(config.embed_model, "text-embedding-3-small");
        assert_eq!(config.embed_dim, 1536);
        assert_eq!(config.embed_batch_size, 128);
        assert_eq!(config.embed_retry_attempts, 3);
        assert!(!config.embed_lenient);
    }

    #[test]
    fn test_default_hnsw_parameters() {
        let config = make_config();
        assert_eq!(config.hnsw_m, 16);
        assert_eq!(config.hnsw_ef_construction, 256);
        assert_eq!(config.ef_search_base, 64);
        assert_eq!(config.ef_search_max, 128);
    }

    #[test]
    fn test_ef_search_small_top_k_uses_floor() {
        let config = make_config();
        // top_k below 10 is floored to 10: 64 + log2(10)*8 = 64 + 26 = 90
        assert_eq!(config.ef_search_for(1), 90);
        assert_eq!(config.ef_search_for(10), 90);
    }

    #[test]
    fn test_ef_search_large_top_k_is_capped() {
        let config = make_config();
        // 64 + log2(50)*8 ~= 109, still under the cap
        assert_eq!(config.ef_search_for(50), 109);
        // log2(1000)*8 ~= 79 -> capped at ef_search_max
        assert_eq!(config.ef_search_for(1000), 128);
    }

    #[test]
    fn test_default_feedback_bounds() {
        let config = make_config();
        assert_eq!(config.feedback_weight, 0.3);
        assert_eq!(config.feedback_min_boost, -0.5);
        assert_eq!(config.feedback_max_boost, 0.5);
        assert_eq!(config.feedback_retention_days, 180);
    }

    #[test]
    fn test_default_cross_encoder_settings() {
        let config = make_config();
        assert!(config.enable_cross_encoder);
        assert_eq!(config.cross_encoder_top_k, 5);
        assert_eq!(config.cross_encoder_threshold, 0.3);
    }

    #[test]
    fn test_router_defaults() {
        let config = make_config();
        assert_eq!(config.router_confidence_threshold, 0.75);
        assert!(config.router_llm_fallback);
        assert!(config.router_cache_dir.is_none());
    }
}
