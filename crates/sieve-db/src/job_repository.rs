use chrono::{DateTime, NaiveTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use sieve_core::error::AppError;
use sieve_core::job::{JobExecution, JobState, NewJobExecution, NewScheduledJob, ScheduledJob};
use sieve_core::traits::JobStore;

const JOB_COLUMNS: &str = "id, owner, url, strategy, elements, frequency, time_of_day, \
     day_of_week, day_of_month, status, notify, last_run, next_run, created_at, updated_at";

/// PostgreSQL-backed store for scheduled jobs and their execution log.
#[derive(Clone)]
pub struct ScheduledJobRepository {
    pool: Pool<Postgres>,
}

impl ScheduledJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_jobs(
        &self,
        filter: &str,
        bind: Option<&str>,
    ) -> Result<Vec<ScheduledJob>, AppError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs {filter} ORDER BY created_at ASC");
        let mut query = sqlx::query_as::<_, ScheduledJobRow>(&sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct ScheduledJobRow {
    id: Uuid,
    owner: String,
    url: String,
    strategy: String,
    elements: serde_json::Value,
    frequency: String,
    time_of_day: NaiveTime,
    day_of_week: Option<i16>,
    day_of_month: Option<i16>,
    status: String,
    notify: bool,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ScheduledJobRow> for ScheduledJob {
    type Error = AppError;

    fn try_from(row: ScheduledJobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |field: &str, e: String| {
            AppError::DatabaseError(format!("Corrupt scheduled job {id}: {field}: {e}"))
        };

        Ok(ScheduledJob {
            id,
            strategy: row.strategy.parse().map_err(|e| corrupt("strategy", e))?,
            elements: serde_json::from_value(row.elements)
                .map_err(|e| corrupt("elements", e.to_string()))?,
            frequency: row.frequency.parse().map_err(|e| corrupt("frequency", e))?,
            status: row.status.parse().map_err(|e| corrupt("status", e))?,
            owner: row.owner,
            url: row.url,
            time_of_day: row.time_of_day,
            day_of_week: row.day_of_week.map(|d| d as u32),
            day_of_month: row.day_of_month.map(|d| d as u32),
            notify: row.notify,
            last_run: row.last_run,
            next_run: row.next_run,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobExecutionRow {
    id: Uuid,
    job_id: Uuid,
    executed_at: DateTime<Utc>,
    outcome: String,
    result_id: Option<Uuid>,
    error_message: Option<String>,
}

impl TryFrom<JobExecutionRow> for JobExecution {
    type Error = AppError;

    fn try_from(row: JobExecutionRow) -> Result<Self, Self::Error> {
        Ok(JobExecution {
            outcome: row.outcome.parse().map_err(|e| {
                AppError::DatabaseError(format!("Corrupt job execution {}: {e}", row.id))
            })?,
            id: row.id,
            job_id: row.job_id,
            executed_at: row.executed_at,
            result_id: row.result_id,
            error_message: row.error_message,
        })
    }
}

impl JobStore for ScheduledJobRepository {
    async fn create_job(
        &self,
        job: &NewScheduledJob,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<ScheduledJob, AppError> {
        job.validate()?;
        let elements = serde_json::to_value(&job.elements)?;

        let sql = format!(
            r#"
            INSERT INTO scheduled_jobs
                (owner, url, strategy, elements, frequency, time_of_day,
                 day_of_week, day_of_month, notify, next_run)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ScheduledJobRow>(&sql)
            .bind(&job.owner)
            .bind(&job.url)
            .bind(job.strategy.as_str())
            .bind(elements)
            .bind(job.frequency.as_str())
            .bind(job.time_of_day)
            .bind(job.day_of_week.map(|d| d as i16))
            .bind(job.day_of_month.map(|d| d as i16))
            .bind(job.notify)
            .bind(next_run)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScheduledJob>, AppError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, ScheduledJobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_active(&self) -> Result<Vec<ScheduledJob>, AppError> {
        self.fetch_jobs("WHERE status = 'active'", None).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ScheduledJob>, AppError> {
        self.fetch_jobs("WHERE owner = $1", Some(owner)).await
    }

    async fn set_status(&self, id: Uuid, status: JobState) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::InvalidRequest(format!("Scheduled job {id} not found")));
        }
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(r#"DELETE FROM scheduled_jobs WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_next_run(
        &self,
        id: Uuid,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE scheduled_jobs SET next_run = $2 WHERE id = $1"#)
            .bind(id)
            .bind(next_run)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn mark_run(
        &self,
        id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET last_run = $2, next_run = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(last_run)
        .bind(next_run)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn record_execution(
        &self,
        execution: &NewJobExecution,
    ) -> Result<JobExecution, AppError> {
        let row = sqlx::query_as::<_, JobExecutionRow>(
            r#"
            INSERT INTO job_executions (job_id, executed_at, outcome, result_id, error_message)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, job_id, executed_at, outcome, result_id, error_message
            "#,
        )
        .bind(execution.job_id)
        .bind(execution.executed_at)
        .bind(execution.outcome.as_str())
        .bind(execution.result_id)
        .bind(&execution.error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        row.try_into()
    }

    async fn list_executions(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> Result<Vec<JobExecution>, AppError> {
        let rows = sqlx::query_as::<_, JobExecutionRow>(
            r#"
            SELECT id, job_id, executed_at, outcome, result_id, error_message
            FROM job_executions
            WHERE job_id = $1
            ORDER BY executed_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
