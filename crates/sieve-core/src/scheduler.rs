//! Recurring-job scheduler.
//!
//! ```text
//!            every reconcile_interval (single-flight)
//!   store ----------------------------------------> live schedule
//!                                                      |
//!            every tick_interval                       v
//!   timer ------> dispatch_due ------> JoinSet<execution>
//!                                           |
//!                   fetch -> save record -> append execution -> mark run -> notify
//! ```
//!
//! The store is the source of truth. The live schedule is a cache that
//! reconciliation rebuilds from the store's active set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::AppError;
use crate::job::{ExecutionOutcome, NewJobExecution, ScheduledJob};
use crate::models::{FetchRequest, NewFetchRecord};
use crate::schedule::ScheduleRule;
use crate::strategy::FetchStrategySelector;
use crate::traits::{BrowserDriver, Fetcher, JobStore, Notifier, ResultStore};

const RECORD_RETRY_DELAY: Duration = Duration::from_millis(100);

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Events emitted by the scheduler for monitoring/logging.
#[derive(Debug, Clone)]
pub enum SchedulerEvent<'a> {
    Started,
    Reconciled {
        summary: &'a ReconcileSummary,
    },
    ReconcileFailed {
        error: &'a str,
    },
    JobDispatched {
        job_id: Uuid,
        url: &'a str,
    },
    JobSkipped {
        job_id: Uuid,
        reason: &'a str,
    },
    JobSucceeded {
        job_id: Uuid,
        record_id: Option<Uuid>,
        next_run: Option<DateTime<Utc>>,
    },
    JobFailed {
        job_id: Uuid,
        error: &'a str,
        next_run: Option<DateTime<Utc>>,
    },
    ExecutionLost {
        job_id: Uuid,
        error: &'a str,
    },
    NotificationFailed {
        job_id: Uuid,
        error: &'a str,
    },
    Stopping {
        in_flight: usize,
    },
    Stopped,
}

/// Trait for receiving scheduler events (decoupled logging).
pub trait SchedulerReporter: Send + Sync + 'static {
    fn report(&self, event: SchedulerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSchedulerReporter;

impl SchedulerReporter for TracingSchedulerReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        match event {
            SchedulerEvent::Started => {
                tracing::info!("Scheduler started");
            }
            SchedulerEvent::Reconciled { summary } => {
                tracing::debug!(
                    added = summary.added,
                    removed = summary.removed,
                    rescheduled = summary.rescheduled,
                    active = summary.active,
                    "Schedule reconciled"
                );
            }
            SchedulerEvent::ReconcileFailed { error } => {
                tracing::error!(%error, "Schedule reconciliation failed");
            }
            SchedulerEvent::JobDispatched { job_id, url } => {
                tracing::info!(%job_id, %url, "Running scheduled job");
            }
            SchedulerEvent::JobSkipped { job_id, reason } => {
                tracing::info!(%job_id, %reason, "Scheduled job skipped");
            }
            SchedulerEvent::JobSucceeded {
                job_id,
                record_id,
                next_run,
            } => {
                tracing::info!(%job_id, ?record_id, ?next_run, "Scheduled job succeeded");
            }
            SchedulerEvent::JobFailed {
                job_id,
                error,
                next_run,
            } => {
                tracing::warn!(%job_id, %error, ?next_run, "Scheduled job failed");
            }
            SchedulerEvent::ExecutionLost { job_id, error } => {
                tracing::error!(%job_id, %error, "Scheduled execution aborted");
            }
            SchedulerEvent::NotificationFailed { job_id, error } => {
                tracing::warn!(%job_id, %error, "Failed to send job notification");
            }
            SchedulerEvent::Stopping { in_flight } => {
                tracing::info!(%in_flight, "Scheduler shutting down");
            }
            SchedulerEvent::Stopped => {
                tracing::info!("Scheduler stopped");
            }
        }
    }
}

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
    pub rescheduled: usize,
    /// Jobs in the live schedule after the pass.
    pub active: usize,
}

struct LiveEntry {
    job: ScheduledJob,
    rule: ScheduleRule,
    next_run: DateTime<Utc>,
    in_flight: bool,
}

/// Drives scheduled jobs from the store through the fetch path.
pub struct JobScheduler<F, B, S, J, N>
where
    F: Fetcher,
    B: BrowserDriver,
    S: ResultStore,
    J: JobStore,
    N: Notifier,
{
    selector: FetchStrategySelector<F, B>,
    results: S,
    jobs: J,
    notifier: N,
    reporter: Arc<dyn SchedulerReporter>,
    config: SchedulerConfig,
    clock: Clock,
    live: Mutex<HashMap<Uuid, LiveEntry>>,
}

impl<F, B, S, J, N> JobScheduler<F, B, S, J, N>
where
    F: Fetcher + 'static,
    B: BrowserDriver + 'static,
    S: ResultStore + 'static,
    J: JobStore + 'static,
    N: Notifier + 'static,
{
    pub fn new(
        selector: FetchStrategySelector<F, B>,
        results: S,
        jobs: J,
        notifier: N,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            selector,
            results,
            jobs,
            notifier,
            reporter: Arc::new(TracingSchedulerReporter),
            config,
            clock: Arc::new(Utc::now),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_reporter<R: SchedulerReporter>(mut self, reporter: R) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    #[cfg(test)]
    fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Spawn the scheduler loop.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(loop_cancel).await });
        SchedulerHandle { cancel, join }
    }

    /// Run the scheduler loop until cancellation.
    pub async fn run(self: Arc<Self>, cancel_token: CancellationToken) {
        self.reporter.report(SchedulerEvent::Started);

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut executions = JoinSet::new();
        let mut reconciling: Option<JoinHandle<()>> = None;
        let mut last_reconcile: Option<Instant> = None;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Some(joined) = executions.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Scheduled execution task failed");
                }
            }

            if reconciling.as_ref().is_some_and(JoinHandle::is_finished) {
                reconciling = None;
            }
            let reconcile_due =
                last_reconcile.is_none_or(|at| at.elapsed() >= self.config.reconcile_interval);
            if reconciling.is_none() && reconcile_due {
                last_reconcile = Some(Instant::now());
                let this = Arc::clone(&self);
                reconciling = Some(tokio::spawn(async move {
                    // Failures are reported inside; the next pass retries.
                    let _ = this.reconcile(this.now()).await;
                }));
            }

            self.dispatch_due(self.now(), &mut executions);
        }

        self.reporter.report(SchedulerEvent::Stopping {
            in_flight: executions.len(),
        });
        executions.detach_all();
        if let Some(handle) = reconciling {
            handle.abort();
        }
        self.reporter.report(SchedulerEvent::Stopped);
    }

    /// Diff the store's active set against the live schedule.
    ///
    /// New jobs are scheduled, missing or paused jobs are dropped (and their
    /// stored next run cleared), and jobs whose definition changed are
    /// rescheduled from `now`.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileSummary, AppError> {
        let active = match self.jobs.list_active().await {
            Ok(active) => active,
            Err(e) => {
                let error = e.to_string();
                self.reporter
                    .report(SchedulerEvent::ReconcileFailed { error: &error });
                return Err(e);
            }
        };

        let mut summary = ReconcileSummary::default();
        let mut removed = Vec::new();
        let mut scheduled = Vec::new();
        {
            let mut live = self.lock_live();
            let active_ids: HashSet<Uuid> = active.iter().map(|job| job.id).collect();
            live.retain(|id, _| {
                let keep = active_ids.contains(id);
                if !keep {
                    removed.push(*id);
                }
                keep
            });

            for job in active {
                let previous = live.get(&job.id);
                if previous.is_some_and(|entry| entry.job.same_definition(&job)) {
                    continue;
                }
                let was_live = previous.is_some();
                let in_flight = previous.is_some_and(|entry| entry.in_flight);

                let rule = match job.rule() {
                    Ok(rule) => rule,
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "Job has an invalid schedule");
                        continue;
                    }
                };
                let Some(next_run) = rule.next_after(now) else {
                    tracing::warn!(job_id = %job.id, "No representable next run for job");
                    continue;
                };

                if was_live {
                    summary.rescheduled += 1;
                } else {
                    summary.added += 1;
                }
                scheduled.push((job.id, next_run));
                live.insert(
                    job.id,
                    LiveEntry {
                        job,
                        rule,
                        next_run,
                        in_flight,
                    },
                );
            }
            summary.removed = removed.len();
            summary.active = live.len();
        }

        for id in removed {
            if let Err(e) = self.jobs.update_next_run(id, None).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to clear next run");
            }
        }
        for (id, next_run) in scheduled {
            if let Err(e) = self.jobs.update_next_run(id, Some(next_run)).await {
                tracing::warn!(job_id = %id, error = %e, "Failed to store next run");
            }
        }

        self.reporter
            .report(SchedulerEvent::Reconciled { summary: &summary });
        Ok(summary)
    }

    /// Spawn every live job due at `now` onto `executions`. Returns how many
    /// were dispatched. A job already running is not dispatched again.
    pub fn dispatch_due(self: &Arc<Self>, now: DateTime<Utc>, executions: &mut JoinSet<()>) -> usize {
        let due: Vec<ScheduledJob> = {
            let mut live = self.lock_live();
            live.values_mut()
                .filter(|entry| !entry.in_flight && entry.next_run <= now)
                .map(|entry| {
                    entry.in_flight = true;
                    entry.job.clone()
                })
                .collect()
        };

        let count = due.len();
        for job in due {
            self.reporter.report(SchedulerEvent::JobDispatched {
                job_id: job.id,
                url: &job.url,
            });
            let this = Arc::clone(self);
            executions.spawn(async move {
                let job_id = job.id;
                let worker = {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move { this.execute(job).await })
                };
                if let Err(e) = worker.await {
                    let error = e.to_string();
                    this.reporter
                        .report(SchedulerEvent::ExecutionLost { job_id, error: &error });
                    this.finish(job_id);
                }
            });
        }
        count
    }

    /// Next run of a live job, if scheduled.
    pub fn next_run(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        self.lock_live().get(&job_id).map(|entry| entry.next_run)
    }

    /// Number of jobs in the live schedule.
    pub fn live_count(&self) -> usize {
        self.lock_live().len()
    }

    async fn execute(&self, job: ScheduledJob) {
        let job_id = job.id;
        let job = match self.jobs.get_job(job_id).await {
            Ok(Some(current)) if current.is_active() => current,
            Ok(_) => {
                self.reporter.report(SchedulerEvent::JobSkipped {
                    job_id,
                    reason: "removed or paused",
                });
                self.unschedule(job_id);
                return;
            }
            Err(e) => {
                tracing::warn!(%job_id, error = %e, "Could not re-read job, using cached copy");
                job
            }
        };

        let request = FetchRequest::new(job.url.clone())
            .with_strategy(job.strategy)
            .with_elements(job.elements.clone())
            .with_timeout(self.config.fetch_timeout);
        let executed_at = self.now();
        let result = self.selector.fetch(&request).await;

        let record = NewFetchRecord::from_result(&job.owner, &request, &result);
        let saved = self.results.save(&record).await;
        let execution = match (&result.error, saved) {
            (Some(error), _) => NewJobExecution::failed(job_id, executed_at, error.clone()),
            (None, Ok(record_id)) => NewJobExecution::success(job_id, executed_at, record_id),
            (None, Err(e)) => {
                NewJobExecution::failed(job_id, executed_at, format!("failed to save result: {e}"))
            }
        };

        self.record_execution(&execution).await;

        let next_run = self.finish(job_id);
        if let Err(e) = self.jobs.mark_run(job_id, executed_at, next_run).await {
            tracing::error!(%job_id, error = %e, "Failed to update job run times");
        }

        match &execution.error_message {
            None => self.reporter.report(SchedulerEvent::JobSucceeded {
                job_id,
                record_id: execution.result_id,
                next_run,
            }),
            Some(error) => self.reporter.report(SchedulerEvent::JobFailed {
                job_id,
                error,
                next_run,
            }),
        }

        if job.notify {
            self.send_notification(&job, &execution).await;
        }
    }

    async fn record_execution(&self, execution: &NewJobExecution) {
        let attempts = self.config.record_attempts.max(1);
        for attempt in 1..=attempts {
            match self.jobs.record_execution(execution).await {
                Ok(_) => return,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        job_id = %execution.job_id,
                        attempt,
                        error = %e,
                        "Failed to record execution, retrying"
                    );
                    tokio::time::sleep(RECORD_RETRY_DELAY * attempt).await;
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %execution.job_id,
                        attempts,
                        error = %e,
                        "Giving up on recording execution"
                    );
                }
            }
        }
    }

    async fn send_notification(&self, job: &ScheduledJob, execution: &NewJobExecution) {
        let subject = format!("Sieve job {}: {}", execution.outcome, job.url);
        let mut body = format!(
            "Job: {}\nURL: {}\nFrequency: {}\nOutcome: {}\nExecuted at: {}\n",
            job.id,
            job.url,
            job.frequency,
            execution.outcome,
            execution.executed_at.to_rfc3339()
        );
        if execution.outcome == ExecutionOutcome::Failed {
            if let Some(error) = &execution.error_message {
                body.push_str(&format!("Error: {error}\n"));
            }
        }

        if let Err(e) = self.notifier.notify(&job.owner, &subject, &body).await {
            let error = e.to_string();
            self.reporter.report(SchedulerEvent::NotificationFailed {
                job_id: job.id,
                error: &error,
            });
        }
    }

    /// Clear the in-flight flag and advance the live entry. Returns the new
    /// next run, or `None` if the job is no longer scheduled.
    fn finish(&self, job_id: Uuid) -> Option<DateTime<Utc>> {
        let mut live = self.lock_live();
        let entry = live.get_mut(&job_id)?;
        entry.in_flight = false;
        match entry.rule.next_after(self.now()) {
            Some(next_run) => {
                entry.next_run = next_run;
                Some(next_run)
            }
            None => {
                live.remove(&job_id);
                None
            }
        }
    }

    fn unschedule(&self, job_id: Uuid) {
        self.lock_live().remove(&job_id);
    }

    fn lock_live(&self) -> MutexGuard<'_, HashMap<Uuid, LiveEntry>> {
        self.live.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned live schedule mutex");
            poisoned.into_inner()
        })
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it to exit. In-flight executions are
    /// detached and finish on their own.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Scheduler loop terminated abnormally");
        }
    }
}
