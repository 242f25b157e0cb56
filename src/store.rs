//! Persistence contracts for tasks and tracked channels.
//!
//! [`crate::db::Db`] implements both traits against Postgres;
//! [`memory::MemoryStore`] implements them in-process for tests.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{NewTask, Task, TaskId, TaskStatus, TaskType, TrackedChannel};

/// Durable task records. Rows are never deleted.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task in `Pending`.
    async fn create(&self, new: NewTask) -> Result<Task>;

    /// Move the task identified by `correlation_id` to `status`.
    ///
    /// Returns `Ok(None)` if no task has that correlation id and
    /// [`crate::error::Error::InvalidTransition`] if the current status
    /// cannot reach `status`. Stamps `started_at` on entering `Running` and
    /// `completed_at` on entering a terminal status.
    async fn update_status(
        &self,
        correlation_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>>;

    /// Move the task from exactly `from` to `to`.
    ///
    /// Same contract as [`TaskStore::update_status`], except that a task in
    /// any status other than `from` is rejected with `InvalidTransition`
    /// even where the state machine would allow the move.
    async fn transition_from(
        &self,
        correlation_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>>;

    /// Any one task for the channel with the given type and status.
    async fn get_by_status(
        &self,
        channel_id: i64,
        task_type: TaskType,
        status: TaskStatus,
    ) -> Result<Option<Task>>;

    /// One task for the channel and type whose status is in `statuses`,
    /// preferring earlier entries of `statuses`.
    async fn find_by_statuses(
        &self,
        channel_id: i64,
        task_type: TaskType,
        statuses: &[TaskStatus],
    ) -> Result<Option<Task>>;

    /// Replace the correlation id of a task (provisional → broker id).
    async fn update_correlation_id(&self, id: TaskId, correlation_id: &str) -> Result<Task>;

    /// All tasks for a channel, oldest first.
    async fn list_by_channel(&self, channel_id: i64) -> Result<Vec<Task>>;

    /// Most recent tasks in a status, newest first.
    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>>;
}

/// Durable tracked-channel records.
#[async_trait]
pub trait ChannelTrackingStore: Send + Sync {
    async fn get(&self, channel_id: i64) -> Result<Option<TrackedChannel>>;

    /// Start tracking a channel (`revisiting = true`, `last_revisited = now`).
    ///
    /// If the channel is already tracked the existing row is returned.
    async fn add(&self, channel_id: i64) -> Result<TrackedChannel>;

    /// Stamp `last_revisited = now`. `Ok(None)` if the channel is not tracked.
    async fn update_last_revisited(&self, channel_id: i64) -> Result<Option<TrackedChannel>>;

    /// Channels with `revisiting` set whose last revisit is unknown or at
    /// least `staleness` old.
    async fn list_due(&self, staleness: chrono::Duration) -> Result<Vec<TrackedChannel>>;

    /// Toggle revisiting on or off. `Ok(None)` if the channel is not tracked.
    async fn set_revisiting(
        &self,
        channel_id: i64,
        revisiting: bool,
    ) -> Result<Option<TrackedChannel>>;

    async fn list(&self) -> Result<Vec<TrackedChannel>>;
}
