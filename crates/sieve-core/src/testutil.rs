//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{
    Frequency, JobExecution, JobState, NewJobExecution, NewScheduledJob, ScheduledJob,
};
use crate::models::{ElementSet, FetchRecord, NewFetchRecord, Strategy};
use crate::traits::{BrowserDriver, BrowserSession, Fetcher, JobStore, Notifier, ResultStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with a response queue, per-URL routes and a sticky default.
#[derive(Clone)]
pub struct MockFetcher {
    /// Consumed front to back before falling back to `default`.
    queue: Arc<Mutex<VecDeque<Result<String, AppError>>>>,
    /// Per-URL responses; always win over the queue.
    routes: Arc<Mutex<HashMap<String, Result<String, AppError>>>>,
    default: Arc<Result<String, AppError>>,
    calls: Arc<Mutex<Vec<String>>>,
    /// URLs whose fetch panics, to exercise worker-crash handling.
    panics: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockFetcher {
    /// Every URL returns `html`.
    pub fn new(html: &str) -> Self {
        Self::with_default(Ok(html.to_string()))
    }

    /// Every URL fails with `error`.
    pub fn with_error(error: AppError) -> Self {
        Self::with_default(Err(error))
    }

    /// Pops one response per call, then serves a default page.
    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        let fetcher = Self::with_default(Ok("<html><body>default</body></html>".to_string()));
        *fetcher.queue.lock().unwrap() = responses.into();
        fetcher
    }

    fn with_default(default: Result<String, AppError>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            routes: Arc::new(Mutex::new(HashMap::new())),
            default: Arc::new(default),
            calls: Arc::new(Mutex::new(Vec::new())),
            panics: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_route(self, url: &str, response: Result<String, AppError>) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), response);
        self
    }

    pub fn with_panic_on(self, url: &str) -> Self {
        self.panics.lock().unwrap().push(url.to_string());
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Most fetches ever observed running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn respond(&self, url: &str) -> Result<String, AppError> {
        if self.panics.lock().unwrap().iter().any(|p| p == url) {
            panic!("mock fetch of {url} panicked");
        }
        if let Some(response) = self.routes.lock().unwrap().get(url) {
            return response.clone();
        }
        if let Some(response) = self.queue.lock().unwrap().pop_front() {
            return response;
        }
        (*self.default).clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<String, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.respond(url);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BrowserState {
    html: String,
    open_error: Option<AppError>,
    nav_errors: VecDeque<AppError>,
    ready_error: Option<AppError>,
    opened: usize,
    closed: usize,
    scrolls: usize,
    navigations: Vec<String>,
}

/// Mock browser driver; every session renders the same document.
#[derive(Clone)]
pub struct MockBrowser {
    state: Arc<Mutex<BrowserState>>,
}

impl MockBrowser {
    pub fn new(html: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrowserState {
                html: html.to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn with_open_error(self, error: AppError) -> Self {
        self.state.lock().unwrap().open_error = Some(error);
        self
    }

    /// Errors returned by successive `navigate` calls before one succeeds.
    pub fn with_nav_errors(self, errors: Vec<AppError>) -> Self {
        self.state.lock().unwrap().nav_errors = errors.into();
        self
    }

    pub fn with_ready_error(self, error: AppError) -> Self {
        self.state.lock().unwrap().ready_error = Some(error);
        self
    }

    pub fn opened(&self) -> usize {
        self.state.lock().unwrap().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn scrolls(&self) -> usize {
        self.state.lock().unwrap().scrolls
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().unwrap().navigations.clone()
    }
}

impl BrowserDriver for MockBrowser {
    type Session = MockSession;

    async fn open_session(&self) -> Result<MockSession, AppError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.open_error.clone() {
            return Err(e);
        }
        state.opened += 1;
        Ok(MockSession {
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

pub struct MockSession {
    state: Arc<Mutex<BrowserState>>,
    closed: bool,
}

impl BrowserSession for MockSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.navigations.push(url.to_string());
        match state.nav_errors.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn wait_for_ready(&mut self, _timeout: Duration) -> Result<(), AppError> {
        match self.state.lock().unwrap().ready_error.clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), AppError> {
        self.state.lock().unwrap().scrolls += 1;
        Ok(())
    }

    async fn rendered_html(&mut self) -> Result<String, AppError> {
        Ok(self.state.lock().unwrap().html.clone())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.lock().unwrap().closed += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

/// In-memory ResultStore that records every save.
#[derive(Clone, Default)]
pub struct MockStore {
    records: Arc<Mutex<Vec<FetchRecord>>>,
    save_error: Arc<Mutex<Option<AppError>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save fails with `error`.
    pub fn with_save_error(error: AppError) -> Self {
        let store = Self::default();
        *store.save_error.lock().unwrap() = Some(error);
        store
    }

    pub fn records(&self) -> Vec<FetchRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ResultStore for MockStore {
    async fn save(&self, record: &NewFetchRecord) -> Result<Uuid, AppError> {
        if let Some(e) = self.save_error.lock().unwrap().clone() {
            return Err(e);
        }
        let id = Uuid::new_v4();
        self.records.lock().unwrap().push(FetchRecord {
            id,
            owner: record.owner.clone(),
            url: record.url.clone(),
            strategy: record.strategy,
            elements: record.elements.clone(),
            result: record.result.clone(),
            status: record.status,
            error_message: record.error_message.clone(),
            elapsed_ms: record.elapsed_ms,
            data_hash: record.data_hash.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FetchRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn history(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FetchRecord>, AppError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.owner == owner)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockJobStore
// ---------------------------------------------------------------------------

/// In-memory JobStore. Jobs are kept in id order.
#[derive(Clone, Default)]
pub struct MockJobStore {
    jobs: Arc<Mutex<BTreeMap<Uuid, ScheduledJob>>>,
    executions: Arc<Mutex<Vec<JobExecution>>>,
    /// Number of upcoming `record_execution` calls that fail.
    record_failures: Arc<Mutex<u32>>,
    list_error: Arc<Mutex<Option<AppError>>>,
    list_delay: Arc<Mutex<Duration>>,
    list_calls: Arc<AtomicUsize>,
    listing: Arc<AtomicUsize>,
    peak_listing: Arc<AtomicUsize>,
}

impl MockJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: ScheduledJob) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn job(&self, id: Uuid) -> Option<ScheduledJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// Edit a stored job in place, as an external writer would.
    pub fn update(&self, id: Uuid, edit: impl FnOnce(&mut ScheduledJob)) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&id) {
            edit(job);
        }
    }

    pub fn remove(&self, id: Uuid) {
        self.jobs.lock().unwrap().remove(&id);
    }

    pub fn executions(&self) -> Vec<JobExecution> {
        self.executions.lock().unwrap().clone()
    }

    pub fn fail_next_records(&self, count: u32) {
        *self.record_failures.lock().unwrap() = count;
    }

    pub fn fail_listing(&self, error: Option<AppError>) {
        *self.list_error.lock().unwrap() = error;
    }

    /// Sleep this long inside every `list_active`.
    pub fn delay_listing(&self, delay: Duration) {
        *self.list_delay.lock().unwrap() = delay;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Most `list_active` calls ever observed running at the same time.
    pub fn peak_concurrent_listings(&self) -> usize {
        self.peak_listing.load(Ordering::SeqCst)
    }
}

impl JobStore for MockJobStore {
    async fn create_job(
        &self,
        job: &NewScheduledJob,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<ScheduledJob, AppError> {
        let now = Utc::now();
        let created = ScheduledJob {
            id: Uuid::new_v4(),
            owner: job.owner.clone(),
            url: job.url.clone(),
            strategy: job.strategy,
            elements: job.elements.clone(),
            frequency: job.frequency,
            time_of_day: job.time_of_day,
            day_of_week: job.day_of_week,
            day_of_month: job.day_of_month,
            status: JobState::Active,
            notify: job.notify,
            last_run: None,
            next_run,
            created_at: now,
            updated_at: now,
        };
        self.insert(created.clone());
        Ok(created)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ScheduledJob>, AppError> {
        Ok(self.job(id))
    }

    async fn list_active(&self) -> Result<Vec<ScheduledJob>, AppError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.listing.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_listing.fetch_max(running, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.listing.fetch_sub(1, Ordering::SeqCst);

        if let Some(e) = self.list_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.is_active())
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<ScheduledJob>, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.owner == owner)
            .cloned()
            .collect())
    }

    async fn set_status(&self, id: Uuid, status: JobState) -> Result<(), AppError> {
        self.update(id, |job| job.status = status);
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, AppError> {
        Ok(self.jobs.lock().unwrap().remove(&id).is_some())
    }

    async fn update_next_run(
        &self,
        id: Uuid,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.update(id, |job| job.next_run = next_run);
        Ok(())
    }

    async fn mark_run(
        &self,
        id: Uuid,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.update(id, |job| {
            job.last_run = Some(last_run);
            job.next_run = next_run;
        });
        Ok(())
    }

    async fn record_execution(&self, execution: &NewJobExecution) -> Result<JobExecution, AppError> {
        {
            let mut failures = self.record_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::DatabaseError("connection reset".into()));
            }
        }
        let recorded = JobExecution {
            id: Uuid::new_v4(),
            job_id: execution.job_id,
            executed_at: execution.executed_at,
            outcome: execution.outcome,
            result_id: execution.result_id,
            error_message: execution.error_message.clone(),
        };
        self.executions.lock().unwrap().push(recorded.clone());
        Ok(recorded)
    }

    async fn list_executions(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobExecution>, AppError> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.job_id == job_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// An active daily job at 09:00 for `owner`, with no run history.
pub fn sample_job(owner: &str, url: &str) -> ScheduledJob {
    let now = Utc::now();
    ScheduledJob {
        id: Uuid::new_v4(),
        owner: owner.to_string(),
        url: url.to_string(),
        strategy: Strategy::Static,
        elements: ElementSet::default(),
        frequency: Frequency::Daily,
        time_of_day: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        day_of_week: None,
        day_of_month: None,
        status: JobState::Active,
        notify: false,
        last_run: None,
        next_run: None,
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// MockNotifier
// ---------------------------------------------------------------------------

/// A message captured by [`MockNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

#[derive(Clone, Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    error: Arc<Mutex<Option<AppError>>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delivery fails with `error`, after being recorded.
    pub fn with_error(error: AppError) -> Self {
        let notifier = Self::default();
        *notifier.error.lock().unwrap() = Some(error);
        notifier
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    async fn notify(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AppError> {
        self.sent.lock().unwrap().push(SentMessage {
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        match self.error.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
