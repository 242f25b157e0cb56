//! Task types and the task state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Durable record of one requested unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Dispatcher correlation key. Provisional until the broker accepts the
    /// message, then the broker-assigned id. Unique across all tasks.
    pub message_id: String,

    pub channel_id: i64,
    pub task_type: TaskType,
    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,
    /// Set only on Pending → Running.
    pub started_at: Option<DateTime<Utc>>,
    /// Set only on a transition into a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    /// User to notify once a StartTracking task completes.
    pub user_id_to_notify: Option<i64>,
}

impl Task {
    /// Apply a status transition in place, stamping the lifecycle timestamps.
    ///
    /// Used by stores that hold tasks in memory; the Postgres store performs
    /// the same checks in SQL.
    pub fn transition(
        &mut self,
        to: TaskStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_transition(self.status, to)?;
        self.status = to;
        if to == TaskStatus::Running {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        if let Some(error) = error {
            self.error_message = Some(error.to_string());
        }
        Ok(())
    }
}

/// Newtype for task ids (database serial).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub i64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate a state transition, returning an error if disallowed.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Task type
// ---------------------------------------------------------------------------

/// What kind of work a task performs. Each type has exactly one executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Begin tracking a channel that is not tracked yet.
    StartTracking,
    /// Refresh data for a channel already under tracking.
    RevisitChannel,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::StartTracking => "start_tracking",
            TaskType::RevisitChannel => "revisit_channel",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start_tracking" => Ok(TaskType::StartTracking),
            "revisit_channel" => Ok(TaskType::RevisitChannel),
            other => Err(Error::Validation(format!("unsupported task type: {other}"))),
        }
    }
}

/// Numeric task type code (0 = start tracking, 1 = revisit).
impl TryFrom<i32> for TaskType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(TaskType::StartTracking),
            1 => Ok(TaskType::RevisitChannel),
            other => Err(Error::Validation(format!("unsupported task type: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted, possibly queued, not picked up by a worker yet.
    Pending,
    /// A worker is executing it.
    Running,
    /// Done successfully. Terminal.
    Completed,
    /// Enqueue or execution failed. Terminal.
    Failed,
}

impl TaskStatus {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Failed) // enqueue failed
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    /// Statuses from which `to` is reachable in one step.
    pub fn sources(to: TaskStatus) -> Vec<TaskStatus> {
        [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ]
        .into_iter()
        .filter(|from| from.can_transition_to(to))
        .collect()
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(Error::Validation(format!("unknown task status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Queue payload
// ---------------------------------------------------------------------------

/// The message body handed to the broker for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_type: TaskType,
    pub channel_id: i64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Parameters for persisting a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub(crate) message_id: String,
    pub(crate) task_type: TaskType,
    pub(crate) channel_id: i64,
    pub(crate) user_id_to_notify: Option<i64>,
}

impl NewTask {
    pub fn new(task_type: TaskType, channel_id: i64, message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            task_type,
            channel_id,
            user_id_to_notify: None,
        }
    }

    pub fn notify(mut self, user_id: Option<i64>) -> Self {
        self.user_id_to_notify = user_id;
        self
    }
}
