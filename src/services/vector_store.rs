//! pgvector-backed vector store.
//!
//! One `document_embeddings` table holds every chunk: first-class columns for
//! collection, document id, chunk ordinal, content, and sha256; everything
//! else in JSONB metadata. Cosine distance with an HNSW index; query-time
//! search effort is applied per transaction via `SET LOCAL hnsw.ef_search`
//! where the server supports it, and silently advisory where it does not.

use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;

use crate::config::RagConfig;
use crate::error::Result;
use crate::interfaces::VectorStore;
use crate::models::{chunk_id, SearchHit, UpsertRecord};

/// PostgreSQL vector store using the pgvector extension.
pub struct PgVectorStore {
    pool: PgPool,
    dim: usize,
    ef_search_base: u32,
    ef_search_max: u32,
}

const UPSERT_SQL: &str = r#"
    INSERT INTO document_embeddings
        (collection_name, document_id, chunk_ordinal, content, embedding, metadata, sha256)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (collection_name, document_id, chunk_ordinal)
    DO UPDATE SET
        content = EXCLUDED.content,
        embedding = EXCLUDED.embedding,
        metadata = EXCLUDED.metadata,
        sha256 = EXCLUDED.sha256,
        updated_at = NOW()
"#;

impl PgVectorStore {
    /// Connect a pool and ensure the schema exists.
    pub async fn connect(config: &RagConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(config.database_min_connections)
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_timeout_secs))
            .connect(&config.database_url)
            .await?;

        let store = Self::with_pool(pool, config);
        store.ensure_schema(config).await?;
        Ok(store)
    }

    /// Wrap an existing pool without running DDL.
    pub fn with_pool(pool: PgPool, config: &RagConfig) -> Self {
        Self {
            pool,
            dim: config.embed_dim,
            ef_search_base: config.ef_search_base,
            ef_search_max: config.ef_search_max,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the embeddings table and its indexes if missing.
    async fn ensure_schema(&self, config: &RagConfig) -> Result<()> {
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, "pgvector extension check failed");
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS document_embeddings (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                collection_name VARCHAR(100) NOT NULL,
                document_id VARCHAR(255) NOT NULL,
                chunk_ordinal INTEGER NOT NULL DEFAULT 0,
                content TEXT NOT NULL,
                embedding vector({dim}),
                metadata JSONB DEFAULT '{{}}',
                sha256 VARCHAR(64),
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW(),
                UNIQUE(collection_name, document_id, chunk_ordinal)
            )
            "#,
            dim = self.dim
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_collection
             ON document_embeddings(collection_name)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_sha256
             ON document_embeddings(sha256)",
        )
        .execute(&self.pool)
        .await?;

        // HNSW build can fail on servers without index support for the
        // configured dimension; queries then fall back to a sequential scan.
        if let Err(e) = sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_vector
             ON document_embeddings
             USING hnsw (embedding vector_cosine_ops)
             WITH (m = {m}, ef_construction = {efc})",
            m = config.hnsw_m,
            efc = config.hnsw_ef_construction
        ))
        .execute(&self.pool)
        .await
        {
            tracing::warn!(error = %e, "hnsw index creation failed");
        }

        tracing::info!(dim = self.dim, "vector store schema ready");
        Ok(())
    }

    /// Release the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn hit_from_row(row: &PgRow, with_vectors: bool) -> Result<SearchHit> {
        let doc_id: String = row.try_get("document_id")?;
        let ordinal: i32 = row.try_get("chunk_ordinal")?;
        let metadata: Value = row.try_get("metadata")?;
        let sha256: Option<String> = row.try_get("sha256")?;
        let distance: f64 = row.try_get("distance")?;

        let vector = if with_vectors {
            let embedding: Vector = row.try_get("embedding")?;
            Some(embedding.to_vec())
        } else {
            None
        };

        Ok(SearchHit {
            id: chunk_id(&doc_id, ordinal as usize),
            doc_id,
            ordinal,
            content: row.try_get("content")?,
            metadata,
            sha256: sha256.unwrap_or_default(),
            similarity: 1.0 - distance as f32,
            vector,
        })
    }
}

/// Values bound for one metadata filter.
#[derive(Debug, PartialEq)]
enum FilterBind {
    /// First-class `sha256` column.
    Sha(String),
    /// JSON-path equality: key then value.
    Meta(String, String),
}

fn filter_value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Render conjunctive filter clauses starting at placeholder `$start`.
fn filter_clauses(filters: Option<&Value>, start: usize) -> (String, Vec<FilterBind>) {
    let mut sql = String::new();
    let mut binds = Vec::new();
    let mut idx = start;

    let Some(Value::Object(map)) = filters else {
        return (sql, binds);
    };

    for (key, value) in map {
        let Some(value) = filter_value_to_string(value) else {
            continue;
        };
        if key == "sha256" {
            sql.push_str(&format!(" AND sha256 = ${idx}"));
            idx += 1;
            binds.push(FilterBind::Sha(value));
        } else {
            sql.push_str(&format!(" AND metadata->>${} = ${}", idx, idx + 1));
            idx += 2;
            binds.push(FilterBind::Meta(key.clone(), value));
        }
    }

    (sql, binds)
}

fn build_query_sql(filters: Option<&Value>, with_vectors: bool) -> (String, Vec<FilterBind>) {
    let mut select = String::from("document_id, chunk_ordinal, content, metadata, sha256");
    if with_vectors {
        select.push_str(", embedding");
    }

    let (filter_sql, binds) = filter_clauses(filters, 3);
    let limit_idx = 3 + binds
        .iter()
        .map(|b| match b {
            FilterBind::Sha(_) => 1,
            FilterBind::Meta(_, _) => 2,
        })
        .sum::<usize>();

    let sql = format!(
        "SELECT {select}, embedding <=> $1 AS distance
         FROM document_embeddings
         WHERE collection_name = $2 AND embedding IS NOT NULL{filter_sql}
         ORDER BY distance
         LIMIT ${limit_idx}"
    );

    (sql, binds)
}

async fn fetch_hits<'c, E>(
    executor: E,
    sql: &str,
    vector: &[f32],
    collection: &str,
    binds: &[FilterBind],
    top_k: usize,
) -> std::result::Result<Vec<PgRow>, sqlx::Error>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let mut query = sqlx::query(sql)
        .bind(Vector::from(vector.to_vec()))
        .bind(collection.to_string());

    for bind in binds {
        match bind {
            FilterBind::Sha(value) => {
                query = query.bind(value.clone());
            }
            FilterBind::Meta(key, value) => {
                query = query.bind(key.clone()).bind(value.clone());
            }
        }
    }

    query.bind(top_k as i64).fetch_all(executor).await
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert_batch(&self, records: &[UpsertRecord], collection: &str) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(UPSERT_SQL)
                .bind(collection)
                .bind(&record.document_id)
                .bind(record.ordinal)
                .bind(&record.text)
                .bind(Vector::from(record.vector.clone()))
                .bind(&record.metadata)
                .bind(&record.sha256)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(collection, count = records.len(), "batch upserted");
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        collection: &str,
        filters: Option<&Value>,
        ef_search: Option<u32>,
        with_vectors: bool,
    ) -> Result<Vec<SearchHit>> {
        let (sql, binds) = build_query_sql(filters, with_vectors);

        let rows = match ef_search {
            Some(ef) => {
                let ef = ef.clamp(self.ef_search_base, self.ef_search_max);
                let mut tx = self.pool.begin().await?;
                match sqlx::query(&format!("SET LOCAL hnsw.ef_search = {ef}"))
                    .execute(&mut *tx)
                    .await
                {
                    Ok(_) => {
                        let rows =
                            fetch_hits(&mut *tx, &sql, vector, collection, &binds, top_k).await?;
                        tx.commit().await?;
                        rows
                    }
                    Err(e) => {
                        // Parameter unsupported; treat search effort as advisory.
                        tracing::debug!(error = %e, "hnsw.ef_search not honored");
                        drop(tx);
                        fetch_hits(&self.pool, &sql, vector, collection, &binds, top_k).await?
                    }
                }
            }
            None => fetch_hits(&self.pool, &sql, vector, collection, &binds, top_k).await?,
        };

        rows.iter()
            .map(|row| Self::hit_from_row(row, with_vectors))
            .collect()
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_embeddings WHERE collection_name = $1")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn exists_by_sha256(&self, sha256: &str, collection: &str) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM document_embeddings
             WHERE collection_name = $1 AND sha256 = $2
             LIMIT 1",
        )
        .bind(collection)
        .bind(sha256)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    async fn delete_by_document_id(&self, document_id: &str, collection: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM document_embeddings
             WHERE collection_name = $1 AND document_id = $2",
        )
        .bind(collection)
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
