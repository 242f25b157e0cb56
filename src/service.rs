//! Task service: the entry point for creating and querying tasks.
//!
//! Creation is two-phase. The task row is written first, then handed to
//! the dispatcher. A broker outage therefore still leaves an auditable
//! `Failed` record instead of losing the request.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{error, info};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::model::{NewTask, Task, TaskId, TaskStatus, TaskType};
use crate::store::TaskStore;
use crate::telemetry::metrics;

/// Error string returned to callers and stored on the task when the broker
/// cannot accept a new task.
pub const BROKER_UNAVAILABLE_MESSAGE: &str =
    "Failed to connect to message broker. Please try again later.";

pub struct TaskService {
    tasks: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
}

impl TaskService {
    pub fn new(tasks: Arc<dyn TaskStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { tasks, dispatcher }
    }

    /// Create and enqueue a new task.
    ///
    /// Returns `Ok((task, None))` with the task `Pending` once it is queued.
    /// If the broker is unreachable the task is marked `Failed` and the
    /// failure is returned as `Ok((task, Some(message)))`; callers must treat
    /// a present message as authoritative. `Err` means nothing durable was
    /// written, or the store failed after the broker accepted the message.
    pub async fn create_task(
        &self,
        task_type: TaskType,
        channel_id: i64,
        notify_user_id: Option<i64>,
    ) -> Result<(Task, Option<String>)> {
        let provisional = format!("provisional-{}", Uuid::new_v4());
        let task = self
            .tasks
            .create(NewTask::new(task_type, channel_id, provisional).notify(notify_user_id))
            .await
            .inspect_err(|e| error!(%task_type, channel_id, "failed to create task: {e}"))?;

        match self.dispatcher.enqueue(task_type, channel_id).await {
            Ok(correlation_id) => {
                let task = self
                    .tasks
                    .update_correlation_id(task.id, &correlation_id)
                    .await
                    .inspect_err(|e| {
                        error!(task_id = %task.id, %correlation_id, "failed to record message id: {e}")
                    })?;
                info!(
                    task_id = %task.id,
                    %task_type,
                    channel_id,
                    message_id = %task.message_id,
                    "created task"
                );
                record_created(task_type, "ok");
                Ok((task, None))
            }
            Err(Error::BrokerUnavailable(reason)) => {
                let failed = self
                    .tasks
                    .update_status(
                        &task.message_id,
                        TaskStatus::Failed,
                        Some(BROKER_UNAVAILABLE_MESSAGE),
                    )
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("task {}", task.id)))?;
                error!(
                    task_id = %failed.id,
                    %task_type,
                    channel_id,
                    "failed to enqueue task due to broker connection: {reason}"
                );
                record_created(task_type, "broker_unavailable");
                Ok((failed, Some(BROKER_UNAVAILABLE_MESSAGE.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// Any one task for the channel in the given type and status.
    ///
    /// Used for deduplication; not a general query.
    pub async fn get_task_by_status(
        &self,
        channel_id: i64,
        task_type: TaskType,
        status: TaskStatus,
    ) -> Result<Option<Task>> {
        self.tasks.get_by_status(channel_id, task_type, status).await
    }

    /// One task for the channel whose status is in `statuses`, preferring
    /// earlier entries. A single store query.
    pub async fn find_blocking_task(
        &self,
        channel_id: i64,
        task_type: TaskType,
        statuses: &[TaskStatus],
    ) -> Result<Option<Task>> {
        self.tasks
            .find_by_statuses(channel_id, task_type, statuses)
            .await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.tasks.get(id).await
    }

    pub async fn get_channel_tasks(&self, channel_id: i64) -> Result<Vec<Task>> {
        self.tasks.list_by_channel(channel_id).await
    }

    pub async fn get_tasks_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>> {
        self.tasks.list_by_status(status, limit).await
    }
}

fn record_created(task_type: TaskType, result: &'static str) {
    metrics::tasks_created().add(
        1,
        &[
            KeyValue::new("task_type", task_type.as_str()),
            KeyValue::new("result", result),
        ],
    );
}
