use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Collection-oriented store for result documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert `document` into `collection` unless a document with the same
    /// idempotency key is already there. Returns whether a row was written.
    async fn insert(
        &self,
        collection: &str,
        idempotency_key: &str,
        document: &serde_json::Value,
    ) -> Result<bool, DocumentError>;
}

/// Document collections stored as JSONB rows in PostgreSQL.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a document by collection and idempotency key.
    pub async fn get(
        &self,
        collection: &str,
        idempotency_key: &str,
    ) -> Result<Option<serde_json::Value>, DocumentError> {
        let row = sqlx::query(
            r#"
            SELECT body
            FROM documents
            WHERE collection = $1 AND idempotency_key = $2
            "#,
        )
        .bind(collection)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(r.try_get("body")?),
            None => None,
        })
    }

    /// Number of documents in a collection.
    pub async fn count(&self, collection: &str) -> Result<i64, DocumentError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE collection = $1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(
        &self,
        collection: &str,
        idempotency_key: &str,
        document: &serde_json::Value,
    ) -> Result<bool, DocumentError> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, collection, idempotency_key, body)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (collection, idempotency_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(collection)
        .bind(idempotency_key)
        .bind(document)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
