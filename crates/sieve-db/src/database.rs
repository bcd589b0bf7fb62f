use std::time::Duration;

use sieve_core::AppError;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::fetch_repository::FetchRecordRepository;
use crate::job_repository::ScheduledJobRepository;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// A migrated PostgreSQL pool shared by the fetch-history and job stores.
///
/// Every constructor applies pending migrations, so a `Database` value always
/// has the `fetch_records`, `scheduled_jobs` and `job_executions` tables.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect using `config` and bring the schema up to date.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Self::attach(pool).await
    }

    /// Adopt an existing pool, applying migrations first.
    pub async fn attach(pool: PgPool) -> Result<Self, AppError> {
        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::debug!(migrations = MIGRATOR.iter().count(), "Schema up to date");
        Ok(Self { pool })
    }

    pub fn fetch_records(&self) -> FetchRecordRepository {
        FetchRecordRepository::new(self.pool.clone())
    }

    pub fn scheduled_jobs(&self) -> ScheduledJobRepository {
        ScheduledJobRepository::new(self.pool.clone())
    }
}
