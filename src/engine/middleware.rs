//! Worker middleware: drives the task state machine around each execution
//! and fires completion side effects.
//!
//! Hooks may run on any worker, so all state is looked up by correlation id.
//! Side effects run after the status commit and are best-effort: a failure
//! is logged and counted, never turned back into a task failure.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{Span, debug, error, info, warn};

use crate::backend::NotificationBackend;
use crate::dispatch::Delivery;
use crate::error::{Error, Result};
use crate::model::{Task, TaskStatus, TaskType};
use crate::store::{ChannelTrackingStore, TaskStore};
use crate::telemetry::metrics;
use crate::telemetry::task::record_state_transition;

pub struct WorkerMiddleware {
    tasks: Arc<dyn TaskStore>,
    channels: Arc<dyn ChannelTrackingStore>,
    notifier: Option<Arc<dyn NotificationBackend>>,
}

impl WorkerMiddleware {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        channels: Arc<dyn ChannelTrackingStore>,
        notifier: Option<Arc<dyn NotificationBackend>>,
    ) -> Self {
        Self {
            tasks,
            channels,
            notifier,
        }
    }

    /// Pending → Running. Never blocks execution: an unknown correlation id
    /// or a rejected transition is logged and the executor still runs.
    pub async fn before_execute(&self, delivery: &Delivery) -> Option<Task> {
        let correlation_id = delivery.correlation_id.as_str();
        info!(correlation_id, read_count = delivery.read_count, "starting task");

        match self
            .tasks
            .transition_from(correlation_id, TaskStatus::Pending, TaskStatus::Running, None)
            .await
        {
            Ok(Some(task)) => {
                Span::current().record("task.id", task.id.0);
                record_state_transition(&Span::current(), TaskStatus::Pending, TaskStatus::Running);
                Some(task)
            }
            Ok(None) => {
                warn!(correlation_id, "no task for correlation id, executing anyway");
                None
            }
            Err(Error::InvalidTransition { from, .. }) => {
                warn!(
                    correlation_id,
                    current = %from,
                    redelivery = delivery.is_redelivery(),
                    "task is not pending, executing anyway"
                );
                None
            }
            Err(e) => {
                error!(correlation_id, "failed to mark task running: {e}");
                None
            }
        }
    }

    /// Running → Completed (no error) or Running → Failed, then completion
    /// side effects for Completed tasks.
    ///
    /// Only a Running task takes an outcome. A task still Pending here ran
    /// without `before_execute` recording it, so it is moved to Running
    /// first and `started_at` is stamped before the outcome is applied.
    ///
    /// A redelivered completion for a task that is already Completed
    /// replays the side effects, which are idempotent, without touching the
    /// status.
    pub async fn after_execute(&self, delivery: &Delivery, error: Option<&str>) -> Option<Task> {
        let correlation_id = delivery.correlation_id.as_str();
        let status = match error {
            None => TaskStatus::Completed,
            Some(_) => TaskStatus::Failed,
        };

        let mut outcome = self.finish(correlation_id, status, error).await;
        let unstarted = matches!(
            &outcome,
            Err(Error::InvalidTransition { from, .. }) if from == TaskStatus::Pending.as_str()
        );
        if unstarted {
            if !self.promote_unstarted(correlation_id).await {
                return None;
            }
            outcome = self.finish(correlation_id, status, error).await;
        }

        let task = match outcome {
            Ok(Some(task)) => {
                record_state_transition(&Span::current(), TaskStatus::Running, status);
                task
            }
            Ok(None) => {
                warn!(correlation_id, "no task for correlation id, status not recorded");
                return None;
            }
            Err(Error::InvalidTransition { from, .. }) => {
                return self.handle_rejected_completion(correlation_id, status, &from).await;
            }
            Err(e) => {
                error!(correlation_id, "failed to record task outcome: {e}");
                return None;
            }
        };

        if task.status == TaskStatus::Completed {
            self.apply_completion(&task).await;
        }
        info!(correlation_id, task_id = %task.id, status = %task.status, "task processing complete");
        Some(task)
    }

    async fn finish(
        &self,
        correlation_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        self.tasks
            .transition_from(correlation_id, TaskStatus::Running, status, error)
            .await
    }

    /// Pending → Running for a task whose start was never recorded.
    /// Returns false if the task could not be moved; the outcome is then
    /// dropped so a task is never finished without a start time.
    async fn promote_unstarted(&self, correlation_id: &str) -> bool {
        warn!(correlation_id, "task finished while still pending, recording start");
        match self
            .tasks
            .transition_from(correlation_id, TaskStatus::Pending, TaskStatus::Running, None)
            .await
        {
            Ok(Some(task)) => {
                Span::current().record("task.id", task.id.0);
                record_state_transition(&Span::current(), TaskStatus::Pending, TaskStatus::Running);
                true
            }
            // Another hook moved it meanwhile; the retried outcome sorts it out.
            Err(Error::InvalidTransition { .. }) => true,
            Ok(None) => {
                warn!(correlation_id, "no task for correlation id, status not recorded");
                false
            }
            Err(e) => {
                error!(correlation_id, "failed to mark task running, outcome not recorded: {e}");
                false
            }
        }
    }

    async fn handle_rejected_completion(
        &self,
        correlation_id: &str,
        status: TaskStatus,
        current: &str,
    ) -> Option<Task> {
        let task = match self.tasks.get_by_correlation_id(correlation_id).await {
            Ok(Some(task)) => task,
            Ok(None) => return None,
            Err(e) => {
                error!(correlation_id, "failed to reload task: {e}");
                return None;
            }
        };

        if task.status == TaskStatus::Completed && status == TaskStatus::Completed {
            info!(correlation_id, task_id = %task.id, "redelivered completion, replaying side effects");
            self.apply_completion(&task).await;
        } else {
            warn!(
                correlation_id,
                task_id = %task.id,
                current,
                requested = %status,
                "ignoring outcome for task that cannot take it"
            );
        }
        Some(task)
    }

    async fn apply_completion(&self, task: &Task) {
        match task.task_type {
            TaskType::StartTracking => self.track_channel(task).await,
            TaskType::RevisitChannel => self.mark_revisited(task).await,
        }
    }

    async fn track_channel(&self, task: &Task) {
        let channel_id = task.channel_id;
        match self.channels.get(channel_id).await {
            Ok(Some(_)) => {
                debug!(channel_id, "channel already tracked");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                error!(channel_id, "failed to look up tracked channel: {e}");
                side_effect_failed("track_channel");
                return;
            }
        }

        if let Err(e) = self.channels.add(channel_id).await {
            error!(channel_id, "failed to add tracked channel: {e}");
            side_effect_failed("track_channel");
            return;
        }
        info!(channel_id, "started tracking channel");

        if let Some(user_id) = task.user_id_to_notify {
            self.notify_tracked(user_id, channel_id).await;
        }
    }

    async fn notify_tracked(&self, user_id: i64, channel_id: i64) {
        let Some(notifier) = &self.notifier else {
            debug!(user_id, channel_id, "no notification backend configured");
            return;
        };
        let text = format!("Channel {channel_id} is now being tracked.");
        match notifier.notify(user_id, &text).await {
            Ok(true) => info!(user_id, channel_id, "user notified"),
            Ok(false) => {
                warn!(user_id, channel_id, "notification service rejected message");
                side_effect_failed("notify");
            }
            Err(e) => {
                error!(user_id, channel_id, "failed to notify user: {e}");
                side_effect_failed("notify");
            }
        }
    }

    async fn mark_revisited(&self, task: &Task) {
        let channel_id = task.channel_id;
        match self.channels.update_last_revisited(channel_id).await {
            Ok(Some(_)) => info!(channel_id, "updated last revisit time"),
            Ok(None) => {
                warn!(channel_id, "revisited channel is not tracked");
                side_effect_failed("revisit_channel");
            }
            Err(e) => {
                error!(channel_id, "failed to update last revisit time: {e}");
                side_effect_failed("revisit_channel");
            }
        }
    }
}

fn side_effect_failed(kind: &'static str) {
    metrics::side_effect_failures().add(1, &[KeyValue::new("kind", kind)]);
}
