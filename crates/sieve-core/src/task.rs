use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::FetchResult;

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            _ => Err(format!("Unknown task status: {s}")),
        }
    }
}

/// Snapshot of one asynchronous unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub owner: String,
    pub targets: Vec<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Keyed by target URL.
    pub results: BTreeMap<String, FetchResult>,
    pub error: Option<String>,
    pub completed_count: usize,
    pub total_count: usize,
}

impl Task {
    pub fn new(owner: impl Into<String>, targets: Vec<String>) -> Self {
        let total_count = targets.len();
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            targets,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: BTreeMap::new(),
            error: None,
            completed_count: 0,
            total_count,
        }
    }

    /// Append a note to the task's error text without changing its status.
    fn note_error(&mut self, message: &str) {
        match &mut self.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(message);
            }
            None => self.error = Some(message.to_string()),
        }
    }
}

/// In-memory registry of tasks, addressable by id until evicted.
///
/// Clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<Uuid, Task>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        self.lock_tasks().insert(task.id, task);
    }

    /// Snapshot of a task, visible only to its owner.
    pub fn get(&self, id: Uuid, owner: &str) -> Result<Task, AppError> {
        let tasks = self.lock_tasks();
        let task = tasks.get(&id).ok_or(AppError::TaskNotFound(id))?;
        if task.owner != owner {
            return Err(AppError::TaskUnauthorized(id));
        }
        Ok(task.clone())
    }

    pub fn mark_running(&self, id: Uuid) {
        self.with_task(id, |task| {
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
        });
    }

    /// Store one target's result and advance progress. The task completes
    /// once every target has a result.
    pub fn record_result(&self, id: Uuid, target: &str, result: FetchResult) {
        self.with_task(id, |task| {
            if task.status.is_terminal() {
                return;
            }
            if task.results.insert(target.to_string(), result).is_none() {
                task.completed_count = (task.completed_count + 1).min(task.total_count);
            }
            if task.completed_count == task.total_count {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(Utc::now());
            }
        });
    }

    /// Note a non-fatal problem (e.g. a failed save) on the task.
    pub fn note_error(&self, id: Uuid, message: &str) {
        self.with_task(id, |task| task.note_error(message));
    }

    /// Move an unfinished task to `Error`. Results already recorded are
    /// kept. A finished task only gets the message noted.
    pub fn fail(&self, id: Uuid, message: &str) {
        self.with_task(id, |task| {
            task.note_error(message);
            if task.status.is_terminal() {
                return;
            }
            task.status = TaskStatus::Error;
            task.completed_at = Some(Utc::now());
        });
    }

    /// Drop a task from tracking. Returns the final snapshot if present.
    pub fn evict(&self, id: Uuid) -> Option<Task> {
        self.lock_tasks().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.lock_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_task(&self, id: Uuid, f: impl FnOnce(&mut Task)) {
        match self.lock_tasks().get_mut(&id) {
            Some(task) => f(task),
            None => tracing::debug!(task_id = %id, "Update for evicted task ignored"),
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<Uuid, Task>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned task registry mutex");
            poisoned.into_inner()
        })
    }
}
