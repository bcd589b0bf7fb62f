pub mod config;
pub mod error;
pub mod extract;
pub mod job;
pub mod models;
pub mod orchestrator;
pub mod rate_limit;
pub mod schedule;
pub mod scheduler;
pub mod strategy;
pub mod task;
pub mod traits;
pub mod util;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{FetchConfig, OrchestratorConfig, SchedulerConfig, SieveConfig};
pub use error::AppError;
pub use job::{Frequency, JobExecution, JobState, NewJobExecution, NewScheduledJob, ScheduledJob};
pub use models::{
    ElementKind, ElementSet, FetchRecord, FetchRequest, FetchResult, NewFetchRecord, Strategy,
    compute_hash,
};
pub use orchestrator::{BatchSubmission, Caller, ExecutionMode, Submission, TaskOrchestrator};
pub use rate_limit::{RateLimitConfig, RateLimiter, TierLimits};
pub use schedule::ScheduleRule;
pub use scheduler::{JobScheduler, SchedulerHandle};
pub use strategy::FetchStrategySelector;
pub use task::{Task, TaskRegistry, TaskStatus};
pub use traits::{
    BrowserDriver, BrowserSession, Fetcher, JobStore, NoBrowser, Notifier, NullNotifier,
    NullStore, ResultStore,
};
