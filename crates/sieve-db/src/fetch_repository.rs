use chrono::{DateTime, Utc};
use sieve_core::error::AppError;
use sieve_core::models::{FetchRecord, FetchResult, NewFetchRecord};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// Repository for fetch record persistence in PostgreSQL.
#[derive(Clone)]
pub struct FetchRecordRepository {
    pool: Pool<Postgres>,
}

impl FetchRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Save a fetch outcome. Returns the generated UUID.
    pub async fn save(&self, record: &NewFetchRecord) -> Result<Uuid, AppError> {
        let elements = serde_json::to_value(&record.elements)?;
        let result = serde_json::to_value(&record.result)?;

        let row: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO fetch_records
                (owner, url, strategy, elements, result, status, error_message, elapsed_ms, data_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&record.owner)
        .bind(&record.url)
        .bind(record.strategy.as_str())
        .bind(elements)
        .bind(result)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.elapsed_ms as i64)
        .bind(&record.data_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.0)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<FetchRecord>, AppError> {
        let row = sqlx::query_as::<_, FetchRecordRow>(
            r#"
            SELECT id, owner, url, strategy, elements, result, status, error_message,
                   elapsed_ms, data_hash, created_at
            FROM fetch_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    /// An owner's records, newest first.
    pub async fn history(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FetchRecord>, AppError> {
        let rows = sqlx::query_as::<_, FetchRecordRow>(
            r#"
            SELECT id, owner, url, strategy, elements, result, status, error_message,
                   elapsed_ms, data_hash, created_at
            FROM fetch_records
            WHERE owner = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct FetchRecordRow {
    id: Uuid,
    owner: String,
    url: String,
    strategy: String,
    elements: serde_json::Value,
    result: serde_json::Value,
    status: String,
    error_message: Option<String>,
    elapsed_ms: i64,
    data_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<FetchRecordRow> for FetchRecord {
    type Error = AppError;

    fn try_from(row: FetchRecordRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |field: &str, e: String| {
            AppError::DatabaseError(format!("Corrupt fetch record {id}: {field}: {e}"))
        };

        let result: FetchResult =
            serde_json::from_value(row.result).map_err(|e| corrupt("result", e.to_string()))?;

        Ok(FetchRecord {
            id,
            strategy: row.strategy.parse().map_err(|e| corrupt("strategy", e))?,
            elements: serde_json::from_value(row.elements)
                .map_err(|e| corrupt("elements", e.to_string()))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            result,
            owner: row.owner,
            url: row.url,
            error_message: row.error_message,
            elapsed_ms: row.elapsed_ms.max(0) as u64,
            data_hash: row.data_hash,
            created_at: row.created_at,
        })
    }
}

// -- Trait implementation --

impl sieve_core::traits::ResultStore for FetchRecordRepository {
    async fn save(&self, record: &NewFetchRecord) -> Result<Uuid, AppError> {
        FetchRecordRepository::save(self, record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<FetchRecord>, AppError> {
        FetchRecordRepository::get(self, id).await
    }

    async fn history(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FetchRecord>, AppError> {
        FetchRecordRepository::history(self, owner, limit, offset).await
    }
}
