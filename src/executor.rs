//! Executors: one unit of work per task type.
//!
//! Routing is a `match` over the closed [`TaskType`] enum, so adding a task
//! type without an executor does not compile.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::backend::TrackingBackend;
use crate::error::{Error, Result};
use crate::model::{TaskMessage, TaskType};

/// Executes one task type for a channel. Must tolerate redelivery.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the work. `Ok` carries the backend's message.
    async fn execute(&self, channel_id: i64) -> Result<String>;
}

/// Starts tracking a channel via the tracking backend.
pub struct StartTrackingExecutor {
    backend: Arc<dyn TrackingBackend>,
}

impl StartTrackingExecutor {
    pub fn new(backend: Arc<dyn TrackingBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Executor for StartTrackingExecutor {
    async fn execute(&self, channel_id: i64) -> Result<String> {
        let reply = self.backend.start_tracking(channel_id).await?;
        info!(channel_id, success = reply.success, message = %reply.message, "start tracking result");
        if !reply.success {
            return Err(Error::Backend(format!(
                "Failed to start tracking: {}",
                reply.message
            )));
        }
        Ok(reply.message)
    }
}

/// Revisits a tracked channel via the tracking backend.
pub struct RevisitExecutor {
    backend: Arc<dyn TrackingBackend>,
}

impl RevisitExecutor {
    pub fn new(backend: Arc<dyn TrackingBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Executor for RevisitExecutor {
    async fn execute(&self, channel_id: i64) -> Result<String> {
        let reply = self.backend.revisit(channel_id).await?;
        info!(channel_id, success = reply.success, message = %reply.message, "revisit result");
        if !reply.success {
            return Err(Error::Backend(format!("Failed to revisit: {}", reply.message)));
        }
        Ok(reply.message)
    }
}

/// Dispatch table from task type to executor.
pub struct ExecutorTable {
    start_tracking: Arc<dyn Executor>,
    revisit_channel: Arc<dyn Executor>,
}

impl ExecutorTable {
    pub fn new(start_tracking: Arc<dyn Executor>, revisit_channel: Arc<dyn Executor>) -> Self {
        Self {
            start_tracking,
            revisit_channel,
        }
    }

    /// The standard table: both executors backed by one tracking service.
    pub fn with_tracking_backend(backend: Arc<dyn TrackingBackend>) -> Self {
        Self::new(
            Arc::new(StartTrackingExecutor::new(Arc::clone(&backend))),
            Arc::new(RevisitExecutor::new(backend)),
        )
    }

    pub fn executor_for(&self, task_type: TaskType) -> &Arc<dyn Executor> {
        match task_type {
            TaskType::StartTracking => &self.start_tracking,
            TaskType::RevisitChannel => &self.revisit_channel,
        }
    }

    /// Route a decoded message to its executor and run it.
    pub async fn execute(&self, message: &TaskMessage) -> Result<String> {
        self.executor_for(message.task_type)
            .execute(message.channel_id)
            .await
    }
}
