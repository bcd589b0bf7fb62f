//! Admission, execution and persistence of fetch requests.
//!
//! Sync submissions run inline on the caller's task. Async submissions
//! take a worker-pool permit without waiting (a full pool rejects the
//! submission), register a [`Task`] and return it immediately.
//!
//! The permit is taken before the rate limiter records the call, so a
//! submission bounced by a full pool costs the caller no quota.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::AppError;
use crate::models::{FetchRecord, FetchRequest, FetchResult, NewFetchRecord};
use crate::rate_limit::{DEFAULT_TIER, RateLimiter};
use crate::strategy::FetchStrategySelector;
use crate::task::{Task, TaskRegistry};
use crate::traits::{BrowserDriver, Fetcher, ResultStore};
use crate::util::with_default_scheme;

/// Largest page of history a caller may request.
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Identity and tier of whoever submits work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub tier: String,
}

impl Caller {
    pub fn new(id: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tier: tier.into(),
        }
    }

    /// A caller on the default tier.
    pub fn standard(id: impl Into<String>) -> Self {
        Self::new(id, DEFAULT_TIER)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run inline and return the outcome.
    Sync,
    /// Return a pending task and run on the worker pool.
    Async,
}

#[derive(Debug, Clone)]
pub enum Submission {
    Task(Task),
    Result(FetchResult),
}

#[derive(Debug, Clone)]
pub enum BatchSubmission {
    Task(Task),
    /// Keyed by target URL.
    Results(BTreeMap<String, FetchResult>),
}

#[derive(Clone)]
pub struct TaskOrchestrator<F, B, S>
where
    F: Fetcher,
    B: BrowserDriver,
    S: ResultStore,
{
    selector: FetchStrategySelector<F, B>,
    store: S,
    limiter: RateLimiter,
    registry: TaskRegistry,
    pool: Arc<Semaphore>,
    config: OrchestratorConfig,
}

impl<F, B, S> TaskOrchestrator<F, B, S>
where
    F: Fetcher + 'static,
    B: BrowserDriver + 'static,
    S: ResultStore + 'static,
{
    pub fn new(selector: FetchStrategySelector<F, B>, store: S, config: OrchestratorConfig) -> Self {
        Self {
            selector,
            store,
            limiter: RateLimiter::new(config.rate_limits.clone()),
            registry: TaskRegistry::new(),
            pool: Arc::new(Semaphore::new(config.worker_limit)),
            config,
        }
    }

    /// Fetch a single target.
    pub async fn submit(
        &self,
        mut request: FetchRequest,
        caller: &Caller,
        mode: ExecutionMode,
    ) -> Result<Submission, AppError> {
        request.url = with_default_scheme(&request.url);

        match mode {
            ExecutionMode::Sync => {
                self.admit(caller)?;
                let result = self.run_one(&request, &caller.id, None).await;
                Ok(Submission::Result(result))
            }
            ExecutionMode::Async => {
                let permit = self.take_permit()?;
                self.admit(caller)?;
                let task = Task::new(caller.id.clone(), vec![request.url.clone()]);
                self.registry.insert(task.clone());
                self.spawn_task(task.id, caller.id.clone(), vec![request], 1, permit);
                Ok(Submission::Task(task))
            }
        }
    }

    /// Fetch several targets with at most `min(len, cap, concurrency)` in
    /// flight. Duplicate targets are collapsed, first one wins.
    pub async fn submit_batch(
        &self,
        requests: Vec<FetchRequest>,
        caller: &Caller,
        mode: ExecutionMode,
        concurrency: usize,
    ) -> Result<BatchSubmission, AppError> {
        if requests.is_empty() {
            return Err(AppError::InvalidRequest(
                "batch must contain at least one URL".into(),
            ));
        }
        let max = self.limiter.max_batch(&caller.tier);
        if requests.len() > max {
            return Err(AppError::BatchTooLarge {
                max,
                requested: requests.len(),
            });
        }
        let requests = dedupe(requests);
        let width = requests
            .len()
            .min(self.config.batch_concurrency_cap)
            .min(concurrency.max(1));

        match mode {
            ExecutionMode::Sync => {
                self.admit(caller)?;
                let results = self.run_batch(requests, &caller.id, width, None).await;
                Ok(BatchSubmission::Results(results))
            }
            ExecutionMode::Async => {
                let permit = self.take_permit()?;
                self.admit(caller)?;
                let targets = requests.iter().map(|r| r.url.clone()).collect();
                let task = Task::new(caller.id.clone(), targets);
                self.registry.insert(task.clone());
                self.spawn_task(task.id, caller.id.clone(), requests, width, permit);
                Ok(BatchSubmission::Task(task))
            }
        }
    }

    /// Snapshot of a task owned by `caller`.
    pub fn task(&self, id: Uuid, caller: &Caller) -> Result<Task, AppError> {
        self.registry.get(id, &caller.id)
    }

    pub fn evict(&self, id: Uuid) -> Option<Task> {
        self.registry.evict(id)
    }

    /// A caller's persisted fetches, newest first. `limit` is clamped to 1..=100.
    pub async fn history(
        &self,
        caller: &Caller,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<FetchRecord>, AppError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        self.store.history(&caller.id, limit, offset).await
    }

    fn admit(&self, caller: &Caller) -> Result<(), AppError> {
        if self.limiter.admit(&caller.id, &caller.tier) {
            Ok(())
        } else {
            tracing::info!(caller = %caller.id, tier = %caller.tier, "Rate limit exceeded");
            Err(AppError::RateLimitExceeded)
        }
    }

    fn take_permit(&self) -> Result<OwnedSemaphorePermit, AppError> {
        Arc::clone(&self.pool).try_acquire_owned().map_err(|_| {
            tracing::warn!(limit = self.config.worker_limit, "Worker pool saturated");
            AppError::PoolSaturated
        })
    }

    fn spawn_task(
        &self,
        task_id: Uuid,
        owner: String,
        requests: Vec<FetchRequest>,
        width: usize,
        permit: OwnedSemaphorePermit,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            this.registry.mark_running(task_id);
            tracing::info!(%task_id, targets = requests.len(), "Task started");

            let worker = {
                let this = this.clone();
                tokio::spawn(async move {
                    this.run_batch(requests, &owner, width, Some(task_id)).await;
                })
            };

            match worker.await {
                Ok(()) => tracing::info!(%task_id, "Task finished"),
                Err(e) => {
                    tracing::error!(%task_id, error = %e, "Task worker failed");
                    this.registry.fail(task_id, &format!("worker failed: {e}"));
                }
            }
        });
    }

    async fn run_batch(
        &self,
        requests: Vec<FetchRequest>,
        owner: &str,
        width: usize,
        task_id: Option<Uuid>,
    ) -> BTreeMap<String, FetchResult> {
        stream::iter(requests)
            .map(|request| async move {
                let result = self.run_one(&request, owner, task_id).await;
                (request.url, result)
            })
            .buffer_unordered(width.max(1))
            .collect()
            .await
    }

    /// Fetch, persist, then publish the result to the task (if any).
    async fn run_one(&self, request: &FetchRequest, owner: &str, task_id: Option<Uuid>) -> FetchResult {
        let result = self.selector.fetch(request).await;

        let record = NewFetchRecord::from_result(owner, request, &result);
        if let Err(e) = self.store.save(&record).await {
            tracing::error!(url = %request.url, %owner, error = %e, "Failed to persist fetch result");
            if let Some(id) = task_id {
                self.registry
                    .note_error(id, &format!("failed to save result for {}: {e}", request.url));
            }
        }

        if let Some(id) = task_id {
            self.registry.record_result(id, &request.url, result.clone());
        }
        result
    }
}

fn dedupe(requests: Vec<FetchRequest>) -> Vec<FetchRequest> {
    let mut seen = HashSet::new();
    requests
        .into_iter()
        .map(|mut request| {
            request.url = with_default_scheme(&request.url);
            request
        })
        .filter(|request| seen.insert(request.url.clone()))
        .collect()
}
