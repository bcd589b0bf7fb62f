use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{JobExecution, JobState, NewJobExecution, NewScheduledJob, ScheduledJob};
use crate::models::{FetchRecord, NewFetchRecord};

/// Fetches raw HTML over plain HTTP.
///
/// One attempt per call; retrying is the caller's job. Failures must be
/// classified so that [`AppError::is_retryable`] is meaningful.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// One isolated browser page. Dropped sessions must not leak processes.
pub trait BrowserSession: Send {
    fn navigate(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Wait until the document body is present.
    fn wait_for_ready(&mut self, timeout: Duration)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn scroll_to_bottom(&mut self) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Snapshot of the rendered document.
    fn rendered_html(&mut self) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Release the page. Safe to call more than once.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens browser sessions for dynamic rendering.
pub trait BrowserDriver: Send + Sync + Clone {
    type Session: BrowserSession;

    fn open_session(&self) -> impl Future<Output = Result<Self::Session, AppError>> + Send;
}

/// Driver used when no browser is available: every session fails to open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

/// Session type of [`NoBrowser`]; never constructed.
#[derive(Debug)]
pub enum NoSession {}

impl BrowserSession for NoSession {
    async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), AppError> {
        match *self {}
    }

    async fn wait_for_ready(&mut self, _timeout: Duration) -> Result<(), AppError> {
        match *self {}
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), AppError> {
        match *self {}
    }

    async fn rendered_html(&mut self) -> Result<String, AppError> {
        match *self {}
    }

    async fn close(&mut self) {
        match *self {}
    }
}

impl BrowserDriver for NoBrowser {
    type Session = NoSession;

    async fn open_session(&self) -> Result<NoSession, AppError> {
        Err(AppError::Browser(
            "dynamic rendering unavailable: no browser configured".into(),
        ))
    }
}

/// Persists and retrieves fetch outcomes.
pub trait ResultStore: Send + Sync + Clone {
    /// Save a fetch outcome. Returns the generated UUID.
    fn save(&self, record: &NewFetchRecord)
    -> impl Future<Output = Result<Uuid, AppError>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<FetchRecord>, AppError>> + Send;

    /// An owner's records, newest first.
    fn history(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> impl Future<Output = Result<Vec<FetchRecord>, AppError>> + Send;
}

/// A no-op ResultStore for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullStore;

impl ResultStore for NullStore {
    async fn save(&self, _record: &NewFetchRecord) -> Result<Uuid, AppError> {
        Ok(Uuid::nil())
    }

    async fn get(&self, _id: Uuid) -> Result<Option<FetchRecord>, AppError> {
        Ok(None)
    }

    async fn history(
        &self,
        _owner: &str,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<FetchRecord>, AppError> {
        Ok(vec![])
    }
}

/// Persistence for scheduled jobs and their execution history.
pub trait JobStore: Send + Sync + Clone {
    fn create_job(
        &self,
        job: &NewScheduledJob,
        next_run: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<ScheduledJob, AppError>> + Send;

    fn get_job(&self, id: Uuid)
    -> impl Future<Output = Result<Option<ScheduledJob>, AppError>> + Send;

    fn list_active(&self) -> impl Future<Output = Result<Vec<ScheduledJob>, AppError>> + Send;

    fn list_by_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<ScheduledJob>, AppError>> + Send;

    fn set_status(
        &self,
        id: Uuid,
        status: JobState,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Remove a job. Returns false when it did not exist.
    fn delete_job(&self, id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn update_next_run(
        &self,
        id: Uuid,
        next_run: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Stamp a finished run.
    fn mark_run(
        &self,
        id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn record_execution(
        &self,
        execution: &NewJobExecution,
    ) -> impl Future<Output = Result<JobExecution, AppError>> + Send;

    /// A job's executions, newest first.
    fn list_executions(
        &self,
        job_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<JobExecution>, AppError>> + Send;
}

/// Delivers run notifications.
pub trait Notifier: Send + Sync + Clone {
    fn notify(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Notifier that drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    async fn notify(&self, _recipient: &str, _subject: &str, _body: &str) -> Result<(), AppError> {
        Ok(())
    }
}
