//! Feedback persistence for the continual-learning loop.
//!
//! Two tables: `feedback_events` is append-only within a retention window
//! and carries the query fingerprint, rating, and optionally the query
//! embedding; `doc_feedback` is a lazily refreshed per-document aggregate.
//! Aggregates are recomputed on read so concurrent writers never contend on
//! the summary row.

use async_trait::async_trait;
use pgvector::Vector;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::config::RagConfig;
use crate::error::{AppError, Result};
use crate::interfaces::FeedbackSource;
use crate::models::FeedbackStatistics;
use crate::services::chunker::normalize_whitespace;

/// Minimum cosine similarity for a stored query to contribute to the
/// similarity-weighted aggregate.
const SIMILAR_QUERY_THRESHOLD: f64 = 0.8;

/// Fingerprint of a query: SHA-256 of its lowercased, whitespace-collapsed
/// form. Aggregates feedback across trivially-different phrasings.
pub fn query_fingerprint(query: &str) -> String {
    let normalized = normalize_whitespace(query).to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// Document-level aggregate score in [-1, 1].
pub fn document_score(pos: i64, neg: i64) -> f32 {
    let total = pos + neg;
    if total == 0 {
        return 0.0;
    }
    (pos - neg) as f32 / total as f32
}

/// Similarity-weighted mean of ratings.
pub(crate) fn weighted_mean(pairs: &[(f64, f64)]) -> f32 {
    let weight_sum: f64 = pairs.iter().map(|(_, sim)| sim).sum();
    if weight_sum <= 0.0 {
        return 0.0;
    }
    let value_sum: f64 = pairs.iter().map(|(rating, sim)| rating * sim).sum();
    (value_sum / weight_sum) as f32
}

fn validate_rating(rating: i16) -> Result<()> {
    if !(-1..=1).contains(&rating) {
        return Err(AppError::Validation(format!(
            "rating must be -1, 0, or +1, got {rating}"
        )));
    }
    Ok(())
}

fn store_err(e: sqlx::Error) -> AppError {
    AppError::FeedbackStore(e.to_string())
}

/// PostgreSQL-backed feedback store.
pub struct PgFeedbackStore {
    pool: PgPool,
    dim: usize,
    retention_days: i32,
}

impl PgFeedbackStore {
    /// Wrap a pool and ensure the feedback tables exist.
    pub async fn connect(pool: PgPool, config: &RagConfig) -> Result<Self> {
        let store = Self {
            pool,
            dim: config.embed_dim,
            retention_days: config.feedback_retention_days as i32,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS feedback_events (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                query_fingerprint VARCHAR(64) NOT NULL,
                doc_id VARCHAR(255) NOT NULL,
                rating SMALLINT NOT NULL,
                user_id VARCHAR(255),
                query_vector vector({dim}),
                created_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
            dim = self.dim
        ))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feedback_pair
             ON feedback_events(query_fingerprint, doc_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feedback_doc
             ON feedback_events(doc_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS doc_feedback (
                doc_id VARCHAR(255) PRIMARY KEY,
                pos BIGINT NOT NULL DEFAULT 0,
                neg BIGINT NOT NULL DEFAULT 0,
                score REAL NOT NULL DEFAULT 0,
                refreshed_at TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        tracing::info!("feedback store schema ready");
        Ok(())
    }

    /// Delete events older than the retention window.
    pub async fn prune_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM feedback_events
             WHERE created_at < NOW() - make_interval(days => $1)",
        )
        .bind(self.retention_days)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(result.rows_affected())
    }

    /// Feedback store counters, bounded by the retention window.
    pub async fn get_statistics(&self) -> Result<FeedbackStatistics> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE rating > 0) AS positive,
                COUNT(*) FILTER (WHERE rating < 0) AS negative,
                COUNT(DISTINCT doc_id) AS documents,
                COUNT(DISTINCT query_fingerprint) AS queries
            FROM feedback_events
            WHERE created_at > NOW() - make_interval(days => $1)
            "#,
        )
        .bind(self.retention_days)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(FeedbackStatistics {
            total_feedback_records: row.try_get("total").map_err(store_err)?,
            positive_count: row.try_get("positive").map_err(store_err)?,
            negative_count: row.try_get("negative").map_err(store_err)?,
            distinct_documents: row.try_get("documents").map_err(store_err)?,
            distinct_queries: row.try_get("queries").map_err(store_err)?,
        })
    }

    /// Refresh the lazy per-document aggregate rows.
    async fn refresh_doc_feedback(&self, scores: &HashMap<String, (i64, i64)>) -> Result<()> {
        for (doc_id, (pos, neg)) in scores {
            sqlx::query(
                r#"
                INSERT INTO doc_feedback (doc_id, pos, neg, score, refreshed_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (doc_id)
                DO UPDATE SET pos = $2, neg = $3, score = $4, refreshed_at = NOW()
                "#,
            )
            .bind(doc_id)
            .bind(pos)
            .bind(neg)
            .bind(document_score(*pos, *neg))
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl FeedbackSource for PgFeedbackStore {
    async fn get_query_feedback_score(
        &self,
        query: &str,
        doc_id: &str,
        query_embedding: Option<&[f32]>,
    ) -> Result<f32> {
        let fingerprint = query_fingerprint(query);

        let exact: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(rating)::float8
            FROM feedback_events
            WHERE query_fingerprint = $1 AND doc_id = $2
              AND created_at > NOW() - make_interval(days => $3)
            "#,
        )
        .bind(&fingerprint)
        .bind(doc_id)
        .bind(self.retention_days)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        if let Some(avg) = exact {
            return Ok(avg as f32);
        }

        // No exact match; widen to similar stored queries when the caller
        // supplied an embedding.
        let Some(embedding) = query_embedding else {
            return Ok(0.0);
        };

        let rows = sqlx::query(
            r#"
            SELECT rating::float8 AS rating,
                   1 - (query_vector <=> $1) AS similarity
            FROM feedback_events
            WHERE doc_id = $2
              AND query_vector IS NOT NULL
              AND created_at > NOW() - make_interval(days => $3)
              AND 1 - (query_vector <=> $1) >= $4
            "#,
        )
        .bind(Vector::from(embedding.to_vec()))
        .bind(doc_id)
        .bind(self.retention_days)
        .bind(SIMILAR_QUERY_THRESHOLD)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let pairs: Vec<(f64, f64)> = rows
            .iter()
            .map(|row| {
                Ok((
                    row.try_get::<f64, _>("rating").map_err(store_err)?,
                    row.try_get::<f64, _>("similarity").map_err(store_err)?,
                ))
            })
            .collect::<Result<_>>()?;

        Ok(weighted_mean(&pairs))
    }

    async fn get_document_scores_batch(
        &self,
        doc_ids: &[String],
    ) -> Result<HashMap<String, f32>> {
        if doc_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT doc_id,
                   COUNT(*) FILTER (WHERE rating > 0) AS pos,
                   COUNT(*) FILTER (WHERE rating < 0) AS neg
            FROM feedback_events
            WHERE doc_id = ANY($1)
              AND created_at > NOW() - make_interval(days => $2)
            GROUP BY doc_id
            "#,
        )
        .bind(doc_ids)
        .bind(self.retention_days)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let mut counts = HashMap::new();
        for row in &rows {
            let doc_id: String = row.try_get("doc_id").map_err(store_err)?;
            let pos: i64 = row.try_get("pos").map_err(store_err)?;
            let neg: i64 = row.try_get("neg").map_err(store_err)?;
            counts.insert(doc_id, (pos, neg));
        }

        self.refresh_doc_feedback(&counts).await?;

        Ok(counts
            .into_iter()
            .map(|(doc_id, (pos, neg))| (doc_id, document_score(pos, neg)))
            .collect())
    }

    async fn record_feedback(
        &self,
        query: &str,
        doc_id: &str,
        rating: i16,
        user_id: Option<&str>,
        query_embedding: Option<&[f32]>,
    ) -> Result<bool> {
        validate_rating(rating)?;

        sqlx::query(
            r#"
            INSERT INTO feedback_events
                (query_fingerprint, doc_id, rating, user_id, query_vector)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(query_fingerprint(query))
        .bind(doc_id)
        .bind(rating)
        .bind(user_id)
        .bind(query_embedding.map(|e| Vector::from(e.to_vec())))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        tracing::debug!(doc_id, rating, "feedback recorded");
        Ok(true)
    }

    async fn record_batch_feedback(
        &self,
        query: &str,
        doc_ratings: &[(String, i16)],
        user_id: Option<&str>,
    ) -> Result<usize> {
        for (_, rating) in doc_ratings {
            validate_rating(*rating)?;
        }

        let fingerprint = query_fingerprint(query);
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for (doc_id, rating) in doc_ratings {
            sqlx::query(
                r#"
                INSERT INTO feedback_events
                    (query_fingerprint, doc_id, rating, user_id)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&fingerprint)
            .bind(doc_id)
            .bind(rating)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;

        Ok(doc_ratings.len())
    }

    async fn total_records(&self) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM feedback_events
             WHERE created_at > NOW() - make_interval(days => $1)",
        )
        .bind(self.retention_days)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(total)
    }
}
