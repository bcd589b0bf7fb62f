use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ElementSet, Strategy};
use crate::schedule::ScheduleRule;

/// How often a scheduled job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            _ => Err(format!("Unknown frequency: {s}")),
        }
    }
}

/// Whether a scheduled job takes part in the live schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Active,
    Paused,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Active => "active",
            JobState::Paused => "paused",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(JobState::Active),
            "paused" => Ok(JobState::Paused),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// A persisted recurring fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub owner: String,
    pub url: String,
    pub strategy: Strategy,
    pub elements: ElementSet,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    /// 0 = Monday ... 6 = Sunday (weekly jobs).
    pub day_of_week: Option<u32>,
    /// 1..=31 (monthly jobs).
    pub day_of_month: Option<u32>,
    pub status: JobState,
    pub notify: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn is_active(&self) -> bool {
        self.status == JobState::Active
    }

    /// Resolve the job's frequency fields into a schedule rule.
    pub fn rule(&self) -> Result<ScheduleRule, AppError> {
        ScheduleRule::new(
            self.frequency,
            self.time_of_day,
            self.day_of_week,
            self.day_of_month,
        )
    }

    /// True when both describe the same recurring fetch, ignoring run
    /// bookkeeping (`last_run`, `next_run`, timestamps).
    pub fn same_definition(&self, other: &ScheduledJob) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.url == other.url
            && self.strategy == other.strategy
            && self.elements == other.elements
            && self.frequency == other.frequency
            && self.time_of_day == other.time_of_day
            && self.day_of_week == other.day_of_week
            && self.day_of_month == other.day_of_month
            && self.status == other.status
            && self.notify == other.notify
    }
}

/// Request to create a new scheduled job.
#[derive(Debug, Clone)]
pub struct NewScheduledJob {
    pub owner: String,
    pub url: String,
    pub strategy: Strategy,
    pub elements: ElementSet,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    pub day_of_week: Option<u32>,
    pub day_of_month: Option<u32>,
    pub notify: bool,
}

impl NewScheduledJob {
    pub fn new(
        owner: impl Into<String>,
        url: impl Into<String>,
        frequency: Frequency,
        time_of_day: NaiveTime,
    ) -> Self {
        Self {
            owner: owner.into(),
            url: url.into(),
            strategy: Strategy::default(),
            elements: ElementSet::default(),
            frequency,
            time_of_day,
            day_of_week: None,
            day_of_month: None,
            notify: false,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_elements(mut self, elements: ElementSet) -> Self {
        self.elements = elements;
        self
    }

    pub fn on_weekday(mut self, day_of_week: u32) -> Self {
        self.day_of_week = Some(day_of_week);
        self
    }

    pub fn on_day_of_month(mut self, day_of_month: u32) -> Self {
        self.day_of_month = Some(day_of_month);
        self
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }

    /// Check that the frequency fields describe a valid rule.
    pub fn validate(&self) -> Result<ScheduleRule, AppError> {
        ScheduleRule::new(
            self.frequency,
            self.time_of_day,
            self.day_of_week,
            self.day_of_month,
        )
    }
}

/// Outcome of one scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success,
    Failed,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExecutionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ExecutionOutcome::Success),
            "failed" => Ok(ExecutionOutcome::Failed),
            _ => Err(format!("Unknown execution outcome: {s}")),
        }
    }
}

/// Append-only record of one scheduled run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub result_id: Option<Uuid>,
    pub error_message: Option<String>,
}

/// DTO for appending a [`JobExecution`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewJobExecution {
    pub job_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub outcome: ExecutionOutcome,
    pub result_id: Option<Uuid>,
    pub error_message: Option<String>,
}

impl NewJobExecution {
    pub fn success(job_id: Uuid, executed_at: DateTime<Utc>, result_id: Uuid) -> Self {
        Self {
            job_id,
            executed_at,
            outcome: ExecutionOutcome::Success,
            result_id: Some(result_id),
            error_message: None,
        }
    }

    pub fn failed(job_id: Uuid, executed_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            job_id,
            executed_at,
            outcome: ExecutionOutcome::Failed,
            result_id: None,
            error_message: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_roundtrip() {
        for freq in [
            Frequency::Hourly,
            Frequency::Daily,
            Frequency::Weekly,
            Frequency::Monthly,
        ] {
            let parsed: Frequency = freq.as_str().parse().unwrap();
            assert_eq!(parsed, freq);
        }
        assert!("yearly".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_job_state_parse() {
        assert_eq!("ACTIVE".parse::<JobState>().unwrap(), JobState::Active);
        assert_eq!("paused".parse::<JobState>().unwrap(), JobState::Paused);
    }

    #[test]
    fn test_new_job_builder() {
        let at = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let job = NewScheduledJob::new("alice", "https://example.com", Frequency::Weekly, at)
            .with_strategy(Strategy::Static)
            .on_weekday(0)
            .with_notify(true);

        assert_eq!(job.day_of_week, Some(0));
        assert!(job.notify);
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_new_job_rejects_bad_weekday() {
        let at = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let job =
            NewScheduledJob::new("alice", "https://example.com", Frequency::Weekly, at).on_weekday(7);
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_execution_constructors() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let failed = NewJobExecution::failed(id, now, "HTTP 500");
        assert_eq!(failed.outcome, ExecutionOutcome::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("HTTP 500"));
        assert!(failed.result_id.is_none());

        let ok = NewJobExecution::success(id, now, Uuid::nil());
        assert_eq!(ok.outcome, ExecutionOutcome::Success);
        assert_eq!(ok.result_id, Some(Uuid::nil()));
    }
}
