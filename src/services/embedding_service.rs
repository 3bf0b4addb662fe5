//! Multi-provider embedding service.
//!
//! Maps text to fixed-dimension vectors through any provider speaking the
//! OpenAI-compatible `POST {base}/embeddings` interface. The provider is
//! chosen explicitly or auto-detected from the model name; the vector
//! dimension comes from a declared model table, or is adopted from the first
//! successful response when the model is unknown.
//!
//! Batches are sliced to `batch_size` and sent with exponential backoff. In
//! lenient mode a batch that exhausts its retries falls back per-text to a
//! deterministic SHA-256 hash vector, which keeps development and degraded
//! environments running with non-semantic but bit-reproducible vectors.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RagConfig;
use crate::error::{AppError, Result};
use crate::interfaces::Embedder;

/// Supported embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    OpenAi,
    Azure,
    Cohere,
    HuggingFace,
    Ollama,
    Voyage,
    Bedrock,
    Vertex,
    Mistral,
    Jina,
    /// Deterministic hash vectors; never calls a provider.
    Fallback,
}

impl EmbeddingProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Azure => "azure",
            Self::Cohere => "cohere",
            Self::HuggingFace => "huggingface",
            Self::Ollama => "ollama",
            Self::Voyage => "voyage",
            Self::Bedrock => "bedrock",
            Self::Vertex => "vertex",
            Self::Mistral => "mistral",
            Self::Jina => "jina",
            Self::Fallback => "fallback",
        }
    }
}

/// Model-name prefixes for provider auto-detection.
const PROVIDER_PREFIXES: &[(&str, EmbeddingProvider)] = &[
    ("text-embedding-", EmbeddingProvider::OpenAi),
    ("openai/", EmbeddingProvider::OpenAi),
    ("azure/", EmbeddingProvider::Azure),
    ("cohere/", EmbeddingProvider::Cohere),
    // Cohere model names without a provider prefix
    ("embed-", EmbeddingProvider::Cohere),
    ("huggingface/", EmbeddingProvider::HuggingFace),
    ("ollama/", EmbeddingProvider::Ollama),
    ("voyage/", EmbeddingProvider::Voyage),
    ("bedrock/", EmbeddingProvider::Bedrock),
    ("vertex_ai/", EmbeddingProvider::Vertex),
    ("mistral/", EmbeddingProvider::Mistral),
    ("jina/", EmbeddingProvider::Jina),
];

/// Auto-detect the provider from a model name by longest-prefix match.
/// Unknown models default to the OpenAI-compatible provider.
pub fn detect_provider(model: &str) -> EmbeddingProvider {
    let model_lower = model.to_lowercase();
    PROVIDER_PREFIXES
        .iter()
        .filter(|(prefix, _)| model_lower.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, provider)| *provider)
        .unwrap_or(EmbeddingProvider::OpenAi)
}

/// Declared dimensions for known models.
pub fn infer_dimension(model: &str) -> Option<usize> {
    let model_lower = model.to_lowercase();

    // OpenAI models
    if model_lower.contains("text-embedding-3-small") {
        return Some(1536);
    }
    if model_lower.contains("text-embedding-3-large") {
        return Some(3072);
    }
    if model_lower.contains("text-embedding-ada-002") {
        return Some(1536);
    }

    // Cohere models
    if model_lower.contains("embed-english-light-v3") {
        return Some(384);
    }
    if model_lower.contains("embed-english-v3") || model_lower.contains("embed-multilingual-v3") {
        return Some(1024);
    }

    // Voyage models
    if model_lower.contains("voyage-code-2") {
        return Some(1536);
    }
    if model_lower.contains("voyage-2") || model_lower.contains("voyage-large-2") {
        return Some(1024);
    }

    // Local models
    if model_lower.contains("nomic-embed-text") {
        return Some(768);
    }
    if model_lower.contains("all-minilm") {
        return Some(384);
    }
    if model_lower.contains("bge-") || model_lower.contains("mistral-embed") {
        return Some(1024);
    }

    None
}

fn default_api_base(provider: EmbeddingProvider) -> Option<&'static str> {
    match provider {
        EmbeddingProvider::OpenAi => Some("https://api.openai.com/v1"),
        EmbeddingProvider::Ollama => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

/// Deterministic embedding vector from a SHA-256 digest.
///
/// Byte `i` of the digest lands at slot `(i * 64) % dim`, normalized to
/// [0, 1]. Bit-exact reproducible and documented as non-semantic.
pub fn hash_vec(text: &str, dim: usize) -> Vec<f32> {
    let mut buf = vec![0.0f32; dim];
    let digest = Sha256::digest(text.as_bytes());
    for (i, byte) in digest.iter().enumerate() {
        buf[(i * 64) % dim] = *byte as f32 / 255.0;
    }
    buf
}

/// Constructor options for [`MultiProviderEmbedder`].
pub struct EmbedderOptions {
    pub model: String,
    /// Explicit provider; auto-detected from the model name when None.
    pub provider: Option<EmbeddingProvider>,
    /// Explicit dimension; inferred from the model table when None.
    pub dimension: Option<usize>,
    /// Last-resort dimension when neither declared nor inferred.
    pub default_dimension: usize,
    pub api_key: Option<SecretString>,
    pub api_base: Option<String>,
    pub batch_size: usize,
    pub timeout: Duration,
    pub retry_attempts: u32,
    /// Fall back to hash vectors instead of failing when retries exhaust.
    pub lenient: bool,
    /// Cohere-like `input_type` parameter.
    pub input_type: Option<String>,
}

impl EmbedderOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: None,
            dimension: None,
            default_dimension: 1536,
            api_key: None,
            api_base: None,
            batch_size: 128,
            timeout: Duration::from_secs(60),
            retry_attempts: 3,
            lenient: false,
            input_type: None,
        }
    }
}

/// Counters kept by the embedder.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedderStats {
    pub total_requests: u64,
    pub total_texts: u64,
    pub provider_calls: u64,
    pub fallback_calls: u64,
    pub errors: u64,
}

/// Embedder over pluggable HTTP providers with deterministic fallback.
pub struct MultiProviderEmbedder {
    model: String,
    provider: EmbeddingProvider,
    dimension: AtomicUsize,
    api_key: Option<SecretString>,
    api_base: Option<String>,
    batch_size: usize,
    retry_attempts: u32,
    lenient: bool,
    input_type: Option<String>,
    client: reqwest::Client,

    total_requests: AtomicU64,
    total_texts: AtomicU64,
    provider_calls: AtomicU64,
    fallback_calls: AtomicU64,
    errors: AtomicU64,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl MultiProviderEmbedder {
    pub fn new(options: EmbedderOptions) -> Self {
        let provider = options
            .provider
            .unwrap_or_else(|| detect_provider(&options.model));
        let dimension = options
            .dimension
            .or_else(|| infer_dimension(&options.model))
            .unwrap_or(options.default_dimension);

        let input_type = match provider {
            EmbeddingProvider::Cohere => Some(
                options
                    .input_type
                    .unwrap_or_else(|| "search_document".to_string()),
            ),
            _ => options.input_type,
        };

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .unwrap_or_default();

        tracing::info!(
            model = %options.model,
            provider = provider.as_str(),
            dimension,
            lenient = options.lenient,
            "embedding service initialized"
        );

        Self {
            model: options.model,
            provider,
            dimension: AtomicUsize::new(dimension),
            api_key: options.api_key,
            api_base: options.api_base,
            batch_size: options.batch_size.max(1),
            retry_attempts: options.retry_attempts.max(1),
            lenient: options.lenient,
            input_type,
            client,
            total_requests: AtomicU64::new(0),
            total_texts: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Build an embedder from application configuration.
    pub fn from_config(config: &RagConfig) -> Self {
        let mut options = EmbedderOptions::new(config.embed_model.clone());
        options.dimension = Some(config.embed_dim);
        options.api_key = config.embed_api_key.clone();
        options.api_base = config.embed_api_base.clone();
        options.batch_size = config.embed_batch_size;
        options.retry_attempts = config.embed_retry_attempts;
        options.lenient = config.embed_lenient;
        Self::new(options)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> EmbeddingProvider {
        self.provider
    }

    pub fn stats(&self) -> EmbedderStats {
        EmbedderStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_texts: self.total_texts.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
            fallback_calls: self.fallback_calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn endpoint(&self) -> Result<String> {
        let base = self
            .api_base
            .as_deref()
            .or_else(|| default_api_base(self.provider))
            .ok_or_else(|| {
                AppError::EmbeddingProvider(format!(
                    "no api_base configured for provider {}",
                    self.provider.as_str()
                ))
            })?;
        Ok(format!("{}/embeddings", base.trim_end_matches('/')))
    }

    async fn call_provider(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = self.endpoint()?;
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            input_type: self.input_type.as_deref(),
        };

        let mut builder = self.client.post(&endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::EmbeddingProvider(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::EmbeddingProvider(format!(
                "provider returned {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AppError::EmbeddingProvider(format!("invalid response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(AppError::EmbeddingProvider(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();

        // Adopt the dimension from the first successful response when the
        // model was not in the declared table.
        if let Some(first) = vectors.first() {
            let current = self.dimension.load(Ordering::Relaxed);
            if current != first.len() {
                tracing::warn!(
                    declared = current,
                    observed = first.len(),
                    "adopting embedding dimension from provider response"
                );
                self.dimension.store(first.len(), Ordering::Relaxed);
            }
        }

        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        Ok(vectors)
    }

    /// One batch group with retries and exponential backoff.
    async fn embed_group(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err = None;
        for attempt in 1..=self.retry_attempts {
            match self.call_provider(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    if attempt < self.retry_attempts {
                        let backoff = Duration::from_secs(2u64.pow(attempt));
                        tracing::warn!(
                            attempt,
                            backoff_secs = backoff.as_secs(),
                            error = %e,
                            "embedding attempt failed, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        let err =
            last_err.unwrap_or_else(|| AppError::EmbeddingProvider("no attempts executed".into()));

        if self.lenient {
            tracing::warn!(error = %err, "provider exhausted retries, using hash fallback");
            self.fallback_calls.fetch_add(1, Ordering::Relaxed);
            let dim = self.dimension();
            return Ok(texts.iter().map(|t| hash_vec(t, dim)).collect());
        }

        Err(err)
    }
}

#[async_trait]
impl Embedder for MultiProviderEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::EmbeddingProvider("no embedding returned".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_texts
            .fetch_add(texts.len() as u64, Ordering::Relaxed);

        if self.provider == EmbeddingProvider::Fallback {
            self.fallback_calls.fetch_add(1, Ordering::Relaxed);
            let dim = self.dimension();
            return Ok(texts.iter().map(|t| hash_vec(t, dim)).collect());
        }

        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_group(group).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }
}
