//! Embedding-based intent classification.
//!
//! Classifies queries by cosine similarity against pre-computed exemplar
//! embeddings: 10-20ms and deterministic, against hundreds of milliseconds
//! for an LLM round trip. An intent's score is the maximum similarity over
//! its exemplars; max preserves best-match semantics for short queries where
//! a mean would wash out. Low-confidence queries optionally fall back to the
//! generator with the top candidate labels.
//!
//! Exemplar embeddings are computed once at init with a local sentence
//! embedding model and can be cached on disk (gzip-compressed JSON arrays
//! keyed by intent label).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{AppError, Result};
use crate::interfaces::Generator;
use crate::models::{intent_examples, ClassificationResult, RouterIntent};

/// Cache file name inside the router cache directory.
const CACHE_FILE: &str = "intent_embeddings";

/// Confidence reported for a successfully parsed LLM fallback answer.
const LLM_FALLBACK_CONFIDENCE: f32 = 0.8;

/// Confidence reported when classification gives up entirely.
const GIVE_UP_CONFIDENCE: f32 = 0.5;

/// Synchronous sentence embedding used for exemplars and queries.
///
/// Separate from the provider-backed [`crate::interfaces::Embedder`]: the
/// router needs a local model with no network dependency on the query path.
pub trait ExemplarEmbedder: Send + Sync {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Map a configured model name onto a loadable local embedding model.
fn resolve_embedding_model(name: &str) -> Option<EmbeddingModel> {
    match name {
        "sentence-transformers/all-MiniLM-L6-v2" | "all-MiniLM-L6-v2" => {
            Some(EmbeddingModel::AllMiniLML6V2)
        }
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2" => {
            Some(EmbeddingModel::ParaphraseMLMiniLML12V2)
        }
        _ => None,
    }
}

/// fastembed-backed exemplar embedder.
pub struct FastembedExemplarEmbedder {
    model: Mutex<TextEmbedding>,
}

impl FastembedExemplarEmbedder {
    /// Load the named model. Fails with `IntentClassifierError` when the
    /// model name is unknown or loading fails.
    pub fn load(model_name: &str) -> Result<Self> {
        let model = resolve_embedding_model(model_name).ok_or_else(|| {
            AppError::IntentClassifier(format!("unknown router embedding model {model_name}"))
        })?;
        let loaded = TextEmbedding::try_new(TextInitOptions::new(model))
            .map_err(|e| AppError::IntentClassifier(format!("model load failed: {e}")))?;
        tracing::info!(model = model_name, "router embedding model loaded");
        Ok(Self {
            model: Mutex::new(loaded),
        })
    }
}

impl ExemplarEmbedder for FastembedExemplarEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut guard = self
            .model
            .lock()
            .map_err(|_| AppError::IntentClassifier("router model lock poisoned".into()))?;
        guard
            .embed(texts.to_vec(), None)
            .map_err(|e| AppError::IntentClassifier(format!("embedding failed: {e}")))
    }
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

/// Pick the highest-scoring intent; iteration over the declared intent order
/// makes ties deterministic.
pub(crate) fn best_intent(scores: &HashMap<RouterIntent, f32>) -> Option<(RouterIntent, f32)> {
    let mut best: Option<(RouterIntent, f32)> = None;
    for intent in RouterIntent::all() {
        let Some(score) = scores.get(intent) else {
            continue;
        };
        match best {
            Some((_, current)) if *score <= current => {}
            _ => best = Some((*intent, *score)),
        }
    }
    best
}

/// Find an intent label inside a generator answer.
pub(crate) fn parse_intent_response(response: &str) -> Option<RouterIntent> {
    let response = response.trim().to_lowercase();
    RouterIntent::all()
        .iter()
        .copied()
        .find(|intent| response.contains(intent.label()))
}

/// Fast intent classifier over cached exemplar embeddings.
pub struct EmbeddingRouter {
    embedder: Arc<dyn ExemplarEmbedder>,
    generator: Option<Arc<dyn Generator>>,
    confidence_threshold: f32,
    use_llm_fallback: bool,
    cache_dir: Option<PathBuf>,
    exemplars: RwLock<HashMap<RouterIntent, Vec<Vec<f32>>>>,
    initialized: AtomicBool,
}

impl EmbeddingRouter {
    pub fn new(
        embedder: Arc<dyn ExemplarEmbedder>,
        confidence_threshold: f32,
        use_llm_fallback: bool,
        cache_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            embedder,
            generator: None,
            confidence_threshold,
            use_llm_fallback,
            cache_dir,
            exemplars: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Pre-compute (or load from cache) the exemplar embeddings.
    pub async fn initialize(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let started = Instant::now();

        if self.load_from_cache() {
            self.initialized.store(true, Ordering::Release);
            tracing::info!("intent embeddings loaded from cache");
            return Ok(());
        }

        let examples = intent_examples();
        let embedder = self.embedder.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            let mut computed: HashMap<RouterIntent, Vec<Vec<f32>>> = HashMap::new();
            for (intent, texts) in examples {
                let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
                computed.insert(intent, embedder.encode(&owned)?);
            }
            Ok::<_, AppError>(computed)
        })
        .await
        .map_err(|e| AppError::IntentClassifier(format!("init task failed: {e}")))??;

        let examples_count: usize = encoded.values().map(Vec::len).sum();
        *self
            .exemplars
            .write()
            .map_err(|_| AppError::IntentClassifier("exemplar lock poisoned".into()))? = encoded;

        self.save_to_cache();
        self.initialized.store(true, Ordering::Release);

        tracing::info!(
            examples = examples_count,
            time_ms = started.elapsed().as_millis() as u64,
            "intent embeddings computed"
        );
        Ok(())
    }

    fn cache_path(&self) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(CACHE_FILE))
    }

    fn load_from_cache(&self) -> bool {
        let Some(path) = self.cache_path() else {
            return false;
        };
        let Ok(file) = std::fs::File::open(&path) else {
            return false;
        };

        let mut decoder = GzDecoder::new(file);
        let mut buf = String::new();
        if decoder.read_to_string(&mut buf).is_err() {
            tracing::warn!(path = %path.display(), "intent cache unreadable");
            return false;
        }

        let Ok(by_label) = serde_json::from_str::<HashMap<String, Vec<Vec<f32>>>>(&buf) else {
            tracing::warn!(path = %path.display(), "intent cache malformed");
            return false;
        };

        let mut exemplars = HashMap::new();
        for (label, vectors) in by_label {
            if let Some(intent) = RouterIntent::from_label(&label) {
                exemplars.insert(intent, vectors);
            }
        }
        if exemplars.is_empty() {
            return false;
        }

        match self.exemplars.write() {
            Ok(mut guard) => {
                *guard = exemplars;
                true
            }
            Err(_) => false,
        }
    }

    fn save_to_cache(&self) {
        let Some(path) = self.cache_path() else {
            return;
        };
        let Some(dir) = path.parent() else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(error = %e, "intent cache dir creation failed");
            return;
        }

        let by_label: HashMap<String, Vec<Vec<f32>>> = match self.exemplars.read() {
            Ok(guard) => guard
                .iter()
                .map(|(intent, vectors)| (intent.label().to_string(), vectors.clone()))
                .collect(),
            Err(_) => return,
        };

        let Ok(json) = serde_json::to_string(&by_label) else {
            return;
        };

        let write_result = std::fs::File::create(&path).and_then(|file| {
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(json.as_bytes())?;
            encoder.finish().map(|_| ())
        });

        match write_result {
            Ok(()) => tracing::info!(path = %path.display(), "intent embeddings cached"),
            Err(e) => tracing::warn!(error = %e, "intent cache save failed"),
        }
    }

    /// Classify a query. One-shot; no state beyond the exemplar cache.
    pub async fn classify(&self, query: &str) -> Result<ClassificationResult> {
        let started = Instant::now();
        self.initialize().await?;

        let query_owned = query.to_string();
        let embedder = self.embedder.clone();
        let query_embedding = tokio::task::spawn_blocking(move || {
            embedder
                .encode(&[query_owned])
                .map(|mut v| v.pop().unwrap_or_default())
        })
        .await
        .map_err(|e| AppError::IntentClassifier(format!("classify task failed: {e}")))??;

        let scores: HashMap<RouterIntent, f32> = {
            let guard = self
                .exemplars
                .read()
                .map_err(|_| AppError::IntentClassifier("exemplar lock poisoned".into()))?;
            guard
                .iter()
                .map(|(intent, vectors)| {
                    let score = vectors
                        .iter()
                        .map(|v| cosine(&query_embedding, v))
                        .fold(0.0f32, f32::max);
                    (*intent, score)
                })
                .collect()
        };

        let all_scores: HashMap<String, f32> = scores
            .iter()
            .map(|(intent, score)| (intent.label().to_string(), *score))
            .collect();

        let (intent, confidence) =
            best_intent(&scores).unwrap_or((RouterIntent::General, 0.0));
        let elapsed = started.elapsed().as_secs_f64() * 1000.0;

        if confidence >= self.confidence_threshold {
            return Ok(ClassificationResult {
                intent,
                confidence,
                all_scores,
                used_llm_fallback: false,
                classification_time_ms: elapsed,
            });
        }

        if self.use_llm_fallback {
            if let Some(generator) = &self.generator {
                return Ok(self
                    .llm_classify(query, &scores, all_scores, generator.clone(), started)
                    .await);
            }
        }

        // Below threshold without a fallback: report the catch-all intent
        // with the observed (low) confidence.
        Ok(ClassificationResult {
            intent: RouterIntent::General,
            confidence,
            all_scores,
            used_llm_fallback: false,
            classification_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn llm_classify(
        &self,
        query: &str,
        scores: &HashMap<RouterIntent, f32>,
        all_scores: HashMap<String, f32>,
        generator: Arc<dyn Generator>,
        started: Instant,
    ) -> ClassificationResult {
        let mut ranked: Vec<(RouterIntent, f32)> =
            scores.iter().map(|(i, s)| (*i, *s)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let candidates = ranked
            .iter()
            .take(5)
            .map(|(intent, _)| intent.label())
            .collect::<Vec<_>>()
            .join(", ");

        let prompt = format!(
            "Classify this query into ONE of these intents:\n{candidates}, general\n\n\
             Query: {query}\n\n\
             Respond with ONLY the intent name, nothing else."
        );

        match generator.generate(&prompt, 20).await {
            Ok(response) => {
                if let Some(intent) = parse_intent_response(&response) {
                    return ClassificationResult {
                        intent,
                        confidence: LLM_FALLBACK_CONFIDENCE,
                        all_scores,
                        used_llm_fallback: true,
                        classification_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                    };
                }
                tracing::warn!(response = %response, "llm fallback answer unparseable");
            }
            Err(e) => {
                tracing::warn!(error = %e, "llm fallback failed");
            }
        }

        ClassificationResult {
            intent: RouterIntent::General,
            confidence: GIVE_UP_CONFIDENCE,
            all_scores,
            used_llm_fallback: true,
            classification_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}
