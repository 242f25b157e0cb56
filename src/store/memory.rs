//! In-process store (for testing).
//!
//! Mirrors the Postgres semantics: unique correlation ids, unique tracked
//! channel ids, status transitions validated against the task state machine.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChannelTrackingStore, TaskStore};
use crate::error::{Error, Result};
use crate::model::task::validate_transition;
use crate::model::{NewTask, Task, TaskId, TaskStatus, TaskType, TrackedChannel};

#[derive(Default)]
struct Tables {
    tasks: Vec<Task>,
    channels: Vec<TrackedChannel>,
}

/// Both stores over a pair of in-memory tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tracked channel row directly, bypassing the task flow.
    pub fn seed_channel(
        &self,
        channel_id: i64,
        revisiting: bool,
        last_revisited: Option<DateTime<Utc>>,
    ) -> TrackedChannel {
        let mut tables = self.lock();
        let channel = TrackedChannel {
            id: tables.channels.len() as i64 + 1,
            channel_id,
            revisiting,
            last_revisited,
            created_at: Utc::now(),
        };
        tables.channels.push(channel.clone());
        channel
    }

    /// Every task row, oldest first.
    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    /// Every tracked channel row.
    pub fn channels(&self) -> Vec<TrackedChannel> {
        self.lock().channels.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned lock only means a test panicked mid-write; the tables
        // are still usable for the assertions that follow.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, new: NewTask) -> Result<Task> {
        let mut tables = self.lock();
        if tables.tasks.iter().any(|t| t.message_id == new.message_id) {
            return Err(Error::Other(format!(
                "duplicate message_id {}",
                new.message_id
            )));
        }
        let task = Task {
            id: TaskId(tables.tasks.len() as i64 + 1),
            message_id: new.message_id,
            channel_id: new.channel_id,
            task_type: new.task_type,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            user_id_to_notify: new.user_id_to_notify,
        };
        tables.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_status(
        &self,
        correlation_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        let mut tables = self.lock();
        let Some(task) = tables
            .tasks
            .iter_mut()
            .find(|t| t.message_id == correlation_id)
        else {
            return Ok(None);
        };
        task.transition(status, error, Utc::now())?;
        Ok(Some(task.clone()))
    }

    async fn transition_from(
        &self,
        correlation_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        validate_transition(from, to)?;
        let mut tables = self.lock();
        let Some(task) = tables
            .tasks
            .iter_mut()
            .find(|t| t.message_id == correlation_id)
        else {
            return Ok(None);
        };
        if task.status != from {
            return Err(Error::InvalidTransition {
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }
        task.transition(to, error, Utc::now())?;
        Ok(Some(task.clone()))
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.lock().tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .find(|t| t.message_id == correlation_id)
            .cloned())
    }

    async fn get_by_status(
        &self,
        channel_id: i64,
        task_type: TaskType,
        status: TaskStatus,
    ) -> Result<Option<Task>> {
        self.find_by_statuses(channel_id, task_type, &[status]).await
    }

    async fn find_by_statuses(
        &self,
        channel_id: i64,
        task_type: TaskType,
        statuses: &[TaskStatus],
    ) -> Result<Option<Task>> {
        let tables = self.lock();
        Ok(statuses.iter().find_map(|status| {
            tables
                .tasks
                .iter()
                .find(|t| {
                    t.channel_id == channel_id && t.task_type == task_type && t.status == *status
                })
                .cloned()
        }))
    }

    async fn update_correlation_id(&self, id: TaskId, correlation_id: &str) -> Result<Task> {
        let mut tables = self.lock();
        if tables
            .tasks
            .iter()
            .any(|t| t.id != id && t.message_id == correlation_id)
        {
            return Err(Error::Other(format!("duplicate message_id {correlation_id}")));
        }
        let task = tables
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
        task.message_id = correlation_id.to_string();
        Ok(task.clone())
    }

    async fn list_by_channel(&self, channel_id: i64) -> Result<Vec<Task>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .filter(|t| t.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>> {
        Ok(self
            .lock()
            .tasks
            .iter()
            .rev()
            .filter(|t| t.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChannelTrackingStore for MemoryStore {
    async fn get(&self, channel_id: i64) -> Result<Option<TrackedChannel>> {
        Ok(self
            .lock()
            .channels
            .iter()
            .find(|c| c.channel_id == channel_id)
            .cloned())
    }

    async fn add(&self, channel_id: i64) -> Result<TrackedChannel> {
        let mut tables = self.lock();
        if let Some(existing) = tables.channels.iter().find(|c| c.channel_id == channel_id) {
            return Ok(existing.clone());
        }
        let now = Utc::now();
        let channel = TrackedChannel {
            id: tables.channels.len() as i64 + 1,
            channel_id,
            revisiting: true,
            last_revisited: Some(now),
            created_at: now,
        };
        tables.channels.push(channel.clone());
        Ok(channel)
    }

    async fn update_last_revisited(&self, channel_id: i64) -> Result<Option<TrackedChannel>> {
        let mut tables = self.lock();
        Ok(tables
            .channels
            .iter_mut()
            .find(|c| c.channel_id == channel_id)
            .map(|c| {
                c.last_revisited = Some(Utc::now());
                c.clone()
            }))
    }

    async fn list_due(&self, staleness: chrono::Duration) -> Result<Vec<TrackedChannel>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .channels
            .iter()
            .filter(|c| c.is_due(now, staleness))
            .cloned()
            .collect())
    }

    async fn set_revisiting(
        &self,
        channel_id: i64,
        revisiting: bool,
    ) -> Result<Option<TrackedChannel>> {
        let mut tables = self.lock();
        Ok(tables
            .channels
            .iter_mut()
            .find(|c| c.channel_id == channel_id)
            .map(|c| {
                c.revisiting = revisiting;
                c.clone()
            }))
    }

    async fn list(&self) -> Result<Vec<TrackedChannel>> {
        Ok(self.lock().channels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_pending() -> MemoryStore {
        let store = MemoryStore::new();
        let mut tables = store.lock();
        tables.tasks.push(Task {
            id: TaskId(1),
            message_id: "m-1".to_string(),
            channel_id: 42,
            task_type: TaskType::RevisitChannel,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            user_id_to_notify: None,
        });
        drop(tables);
        store
    }

    #[tokio::test]
    async fn transition_from_rejects_other_source() {
        let store = store_with_pending();

        // Pending -> Failed is a legal edge, but not from Running.
        let err = store
            .transition_from("m-1", TaskStatus::Running, TaskStatus::Failed, Some("boom"))
            .await
            .unwrap_err();
        assert!(
            matches!(&err, Error::InvalidTransition { from, .. } if from == "pending"),
            "got: {err:?}"
        );
        assert_eq!(store.tasks()[0].status, TaskStatus::Pending);
        assert!(store.tasks()[0].completed_at.is_none());
    }

    #[tokio::test]
    async fn transition_from_applies_matching_source() {
        let store = store_with_pending();

        let running = store
            .transition_from("m-1", TaskStatus::Pending, TaskStatus::Running, None)
            .await
            .unwrap()
            .unwrap();
        assert!(running.started_at.is_some());

        let missing = store
            .transition_from("m-2", TaskStatus::Running, TaskStatus::Completed, None)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
