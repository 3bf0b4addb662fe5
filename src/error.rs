use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Vector store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Reranker load error: {0}")]
    RerankerLoad(String),

    #[error("Feedback store error: {0}")]
    FeedbackStore(String),

    #[error("Intent classifier error: {0}")]
    IntentClassifier(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse error classes for transport collaborators.
///
/// The crate itself has no HTTP surface; a caller embedding it behind a
/// server maps these to status classes (`ExternalService` -> 5xx gateway
/// errors, `System` -> 500, `InvalidInput` -> 400).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller-supplied input was rejected.
    InvalidInput,
    /// An upstream dependency (embedding provider, generator) failed.
    ExternalService,
    /// The store or an internal invariant failed.
    System,
    /// Startup-time misconfiguration; the process should refuse to start.
    Fatal,
}

impl AppError {
    /// Classify this error for surfacing.
    ///
    /// Reranker, feedback, and intent-classifier failures are recovered
    /// internally (degraded modes) and normally never reach a caller; when
    /// they do, they are system errors.
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Configuration(_) => ErrorClass::Fatal,
            AppError::Validation(_) => ErrorClass::InvalidInput,
            AppError::EmbeddingProvider(_) | AppError::ExternalService(_) => {
                ErrorClass::ExternalService
            }
            AppError::Store(_)
            | AppError::RerankerLoad(_)
            | AppError::FeedbackStore(_)
            | AppError::IntentClassifier(_)
            | AppError::Internal(_) => ErrorClass::System,
        }
    }
}

/// Type alias for Results with AppError
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Convenient Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
