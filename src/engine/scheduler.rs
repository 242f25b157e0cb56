//! Revisit scheduler: a single polling loop that requests revisit tasks for
//! channels whose data has gone stale.
//!
//! Deduplication is a status lookup, not a lock. A worker completing a task
//! while a cycle runs can still race the lookup; the combined query only
//! narrows that window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::model::{TaskStatus, TaskType};
use crate::service::TaskService;
use crate::store::ChannelTrackingStore;
use crate::telemetry::metrics;

/// Existing revisit tasks in these statuses block a new one, checked in
/// this order.
const BLOCKING_STATUSES: &[TaskStatus] =
    &[TaskStatus::Pending, TaskStatus::Failed, TaskStatus::Running];

const BLOCKING_STATUSES_RETRYING_FAILED: &[TaskStatus] =
    &[TaskStatus::Pending, TaskStatus::Running];

/// Configuration for the revisit scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub check_interval: Duration,
    /// A channel is due once its last revisit is at least this old.
    pub staleness: chrono::Duration,
    /// Pause after a cycle-level failure.
    pub retry_delay: Duration,
    /// Treat an existing Failed revisit task as retryable instead of
    /// blocking.
    pub retry_failed: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            staleness: chrono::Duration::minutes(360),
            retry_delay: Duration::from_secs(5),
            retry_failed: false,
        }
    }
}

impl SchedulerConfig {
    fn blocking_statuses(&self) -> &'static [TaskStatus] {
        if self.retry_failed {
            BLOCKING_STATUSES_RETRYING_FAILED
        } else {
            BLOCKING_STATUSES
        }
    }
}

/// Summary of one scheduler cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Channels found due.
    pub due: usize,
    /// Revisit tasks created and queued.
    pub created: usize,
    /// Channels skipped because a blocking task exists.
    pub skipped: usize,
    /// Channels whose task could not be created or queued.
    pub failed: usize,
}

enum ChannelOutcome {
    Created,
    Skipped,
    NotQueued,
}

pub struct RevisitScheduler {
    channels: Arc<dyn ChannelTrackingStore>,
    service: Arc<TaskService>,
    config: SchedulerConfig,
    stop: Arc<AtomicBool>,
    wake: Arc<Notify>,
    last_run: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Clone for RevisitScheduler {
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
            service: Arc::clone(&self.service),
            config: self.config.clone(),
            stop: Arc::clone(&self.stop),
            wake: Arc::clone(&self.wake),
            last_run: Arc::clone(&self.last_run),
        }
    }
}

impl RevisitScheduler {
    pub fn new(
        channels: Arc<dyn ChannelTrackingStore>,
        service: Arc<TaskService>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            channels,
            service,
            config,
            stop: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            last_run: Arc::new(Mutex::new(None)),
        }
    }

    /// Ask the loop to stop. Checked at cycle boundaries; a cycle already
    /// running finishes first.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// When the last successful cycle finished.
    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run cycles until stopped. Cycle failures back off and retry; they
    /// never end the loop.
    pub async fn run(&self) {
        info!(
            check_interval = ?self.config.check_interval,
            staleness_minutes = self.config.staleness.num_minutes(),
            "revisit scheduler started"
        );

        while !self.is_stopped() {
            let pause = match self.run_cycle().await {
                Ok(_) => {
                    *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
                    metrics::scheduler_cycles().add(1, &[KeyValue::new("result", "ok")]);
                    self.config.check_interval
                }
                Err(e) => {
                    error!("error in revisit scheduler cycle: {e}");
                    metrics::scheduler_cycles().add(1, &[KeyValue::new("result", "error")]);
                    self.config.retry_delay
                }
            };

            if self.is_stopped() {
                break;
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!("revisit scheduler stopped");
    }

    /// One pass over all due channels.
    ///
    /// Only the due-channel query can fail the cycle; per-channel errors
    /// are logged and counted in the report.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let due = self.channels.list_due(self.config.staleness).await?;
        let mut report = CycleReport {
            due: due.len(),
            ..CycleReport::default()
        };

        for channel in &due {
            match self.process_channel(channel.channel_id).await {
                Ok(ChannelOutcome::Created) => report.created += 1,
                Ok(ChannelOutcome::Skipped) => report.skipped += 1,
                Ok(ChannelOutcome::NotQueued) => report.failed += 1,
                Err(e) => {
                    error!(
                        channel_id = channel.channel_id,
                        "failed to create revisit task: {e}"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            due = report.due,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "revisit cycle finished"
        );
        Ok(report)
    }

    async fn process_channel(&self, channel_id: i64) -> Result<ChannelOutcome> {
        if let Some(existing) = self
            .service
            .find_blocking_task(
                channel_id,
                TaskType::RevisitChannel,
                self.config.blocking_statuses(),
            )
            .await?
        {
            debug!(
                channel_id,
                task_id = %existing.id,
                status = %existing.status,
                "revisit task already exists, skipping"
            );
            return Ok(ChannelOutcome::Skipped);
        }

        let (task, error) = self
            .service
            .create_task(TaskType::RevisitChannel, channel_id, None)
            .await?;
        match error {
            None => {
                info!(channel_id, task_id = %task.id, "created revisit task");
                Ok(ChannelOutcome::Created)
            }
            Some(error) => {
                warn!(channel_id, task_id = %task.id, %error, "revisit task not queued");
                Ok(ChannelOutcome::NotQueued)
            }
        }
    }
}
