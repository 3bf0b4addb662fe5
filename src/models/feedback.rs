//! Feedback models for the continual-learning loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Rating for a helpful result.
pub const FEEDBACK_POSITIVE: i16 = 1;
/// Rating for an unhelpful result.
pub const FEEDBACK_NEGATIVE: i16 = -1;
/// Neutral rating.
pub const FEEDBACK_NEUTRAL: i16 = 0;

/// One recorded feedback event. Append-only within the retention window.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub id: Uuid,
    pub query_fingerprint: String,
    pub doc_id: String,
    pub rating: i16,
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lazily refreshed per-document aggregate.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocFeedback {
    pub doc_id: String,
    pub pos: i64,
    pub neg: i64,
    /// `(pos - neg) / (pos + neg)`, in [-1, 1].
    pub score: f32,
    pub refreshed_at: DateTime<Utc>,
}

/// Feedback store counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackStatistics {
    pub total_feedback_records: i64,
    pub positive_count: i64,
    pub negative_count: i64,
    pub distinct_documents: i64,
    pub distinct_queries: i64,
}
