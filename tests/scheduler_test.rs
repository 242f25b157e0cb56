//! Revisit scheduler: due-channel selection, deduplication, and the loop.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use channel_tasks::dispatch::{Dispatcher, DispatcherConfig};
use channel_tasks::dispatch::memory::MemoryBroker;
use channel_tasks::engine::{CycleReport, RevisitScheduler, SchedulerConfig};
use channel_tasks::error::{Error, Result};
use channel_tasks::model::{NewTask, Task, TaskId, TaskStatus, TaskType, TrackedChannel};
use channel_tasks::service::TaskService;
use channel_tasks::store::memory::MemoryStore;
use channel_tasks::store::{ChannelTrackingStore, TaskStore};
use common::{Harness, harness};

fn scheduler(h: &Harness, config: SchedulerConfig) -> RevisitScheduler {
    RevisitScheduler::new(h.store.clone(), Arc::clone(&h.service), config)
}

fn revisit_tasks(h: &Harness, channel_id: i64) -> Vec<Task> {
    h.store
        .tasks()
        .into_iter()
        .filter(|t| t.channel_id == channel_id && t.task_type == TaskType::RevisitChannel)
        .collect()
}

// ---------------------------------------------------------------------------
// Due-channel selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn due_channel_gets_revisit_task() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);

    let report = scheduler(&h, SchedulerConfig::default())
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(
        report,
        CycleReport {
            due: 1,
            created: 1,
            skipped: 0,
            failed: 0
        }
    );
    let tasks = revisit_tasks(&h, 42);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Pending);
    assert_eq!(h.broker.ready_len(), 1);
}

#[tokio::test]
async fn fresh_and_paused_channels_are_left_alone() {
    let h = harness().await;
    h.store.seed_channel(1, true, Some(Utc::now()));
    h.store.seed_channel(2, false, None);
    h.store
        .seed_channel(3, false, Some(Utc::now() - chrono::Duration::days(30)));

    let report = scheduler(&h, SchedulerConfig::default())
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report, CycleReport::default());
    assert!(h.store.tasks().is_empty());
}

#[tokio::test]
async fn staleness_interval_controls_due() {
    let h = harness().await;
    h.store
        .seed_channel(42, true, Some(Utc::now() - chrono::Duration::minutes(30)));

    let patient = SchedulerConfig::default();
    assert_eq!(scheduler(&h, patient).run_cycle().await.unwrap().due, 0);

    let eager = SchedulerConfig {
        staleness: chrono::Duration::minutes(15),
        ..SchedulerConfig::default()
    };
    assert_eq!(scheduler(&h, eager).run_cycle().await.unwrap().created, 1);
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_revisit_blocks_another() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    let scheduler = scheduler(&h, SchedulerConfig::default());

    scheduler.run_cycle().await.unwrap();
    let second = scheduler.run_cycle().await.unwrap();

    assert_eq!(second.skipped, 1);
    assert_eq!(second.created, 0);
    assert_eq!(revisit_tasks(&h, 42).len(), 1);
}

#[tokio::test]
async fn running_revisit_blocks_another() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    let scheduler = scheduler(&h, SchedulerConfig::default());
    scheduler.run_cycle().await.unwrap();

    let delivery = h.next_delivery().await;
    h.middleware(None).before_execute(&delivery).await.unwrap();

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(revisit_tasks(&h, 42).len(), 1);
}

#[tokio::test]
async fn failed_revisit_blocks_by_default() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    let scheduler = scheduler(&h, SchedulerConfig::default());

    h.broker.set_available(false);
    let first = scheduler.run_cycle().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(revisit_tasks(&h, 42)[0].status, TaskStatus::Failed);

    h.broker.set_available(true);
    let second = scheduler.run_cycle().await.unwrap();
    assert_eq!(second.skipped, 1);
    assert_eq!(revisit_tasks(&h, 42).len(), 1);
}

#[tokio::test]
async fn retry_failed_lets_failed_revisit_be_replaced() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    let scheduler = scheduler(
        &h,
        SchedulerConfig {
            retry_failed: true,
            ..SchedulerConfig::default()
        },
    );

    h.broker.set_available(false);
    scheduler.run_cycle().await.unwrap();
    h.broker.set_available(true);
    let second = scheduler.run_cycle().await.unwrap();

    assert_eq!(second.created, 1);
    let statuses: Vec<_> = revisit_tasks(&h, 42).iter().map(|t| t.status).collect();
    assert_eq!(statuses, vec![TaskStatus::Failed, TaskStatus::Pending]);
}

#[tokio::test]
async fn completed_revisit_does_not_block() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    let scheduler = scheduler(&h, SchedulerConfig::default());
    scheduler.run_cycle().await.unwrap();

    // Finish the task without the completion hook so the channel stays due.
    let message_id = revisit_tasks(&h, 42)[0].message_id.clone();
    let store: Arc<dyn TaskStore> = h.store.clone();
    store
        .update_status(&message_id, TaskStatus::Running, None)
        .await
        .unwrap();
    store
        .update_status(&message_id, TaskStatus::Completed, None)
        .await
        .unwrap();

    let report = scheduler.run_cycle().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(revisit_tasks(&h, 42).len(), 2);
}

#[tokio::test]
async fn start_tracking_tasks_do_not_block_revisits() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    h.service
        .create_task(TaskType::StartTracking, 42, None)
        .await
        .unwrap();

    let report = scheduler(&h, SchedulerConfig::default())
        .run_cycle()
        .await
        .unwrap();
    assert_eq!(report.created, 1);
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

/// Delegates to a memory store but fails every lookup for one channel.
struct FlakyTasks {
    inner: Arc<MemoryStore>,
    broken_channel: i64,
}

#[async_trait]
impl TaskStore for FlakyTasks {
    async fn create(&self, new: NewTask) -> Result<Task> {
        self.inner.create(new).await
    }

    async fn update_status(
        &self,
        correlation_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        self.inner.update_status(correlation_id, status, error).await
    }

    async fn transition_from(
        &self,
        correlation_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<Option<Task>> {
        self.inner
            .transition_from(correlation_id, from, to, error)
            .await
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        TaskStore::get(self.inner.as_ref(), id).await
    }

    async fn get_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Task>> {
        self.inner.get_by_correlation_id(correlation_id).await
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
        if channel_id == self.broken_channel {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner
            .find_by_statuses(channel_id, task_type, statuses)
            .await
    }

    async fn update_correlation_id(&self, id: TaskId, correlation_id: &str) -> Result<Task> {
        self.inner.update_correlation_id(id, correlation_id).await
    }

    async fn list_by_channel(&self, channel_id: i64) -> Result<Vec<Task>> {
        self.inner.list_by_channel(channel_id).await
    }

    async fn list_by_status(&self, status: TaskStatus, limit: i64) -> Result<Vec<Task>> {
        self.inner.list_by_status(status, limit).await
    }
}

#[tokio::test]
async fn one_channel_failing_does_not_stop_the_cycle() {
    let store = Arc::new(MemoryStore::new());
    store.seed_channel(1, true, None);
    store.seed_channel(2, true, None);
    store.seed_channel(3, true, None);

    let broker = Arc::new(MemoryBroker::new());
    let dispatcher = Arc::new(
        Dispatcher::open(broker.clone(), DispatcherConfig::default())
            .await
            .unwrap(),
    );
    let tasks = Arc::new(FlakyTasks {
        inner: store.clone(),
        broken_channel: 2,
    });
    let service = Arc::new(TaskService::new(tasks, dispatcher));
    let scheduler = RevisitScheduler::new(store.clone(), service, SchedulerConfig::default());

    let report = scheduler.run_cycle().await.unwrap();

    assert_eq!(report.due, 3);
    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 1);
    let channels: Vec<_> = store.tasks().iter().map(|t| t.channel_id).collect();
    assert_eq!(channels, vec![1, 3]);
}

#[tokio::test]
async fn broker_outage_is_counted_per_channel() {
    let h = harness().await;
    h.store.seed_channel(1, true, None);
    h.store.seed_channel(2, true, None);
    h.broker.set_available(false);

    let report = scheduler(&h, SchedulerConfig::default())
        .run_cycle()
        .await
        .unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(h.store.tasks().len(), 2);
}

/// Channel store whose due-channel query always fails.
struct UnreachableChannels;

#[async_trait]
impl ChannelTrackingStore for UnreachableChannels {
    async fn get(&self, _channel_id: i64) -> Result<Option<TrackedChannel>> {
        Ok(None)
    }

    async fn add(&self, channel_id: i64) -> Result<TrackedChannel> {
        Err(Error::NotFound(format!("channel {channel_id}")))
    }

    async fn update_last_revisited(&self, _channel_id: i64) -> Result<Option<TrackedChannel>> {
        Ok(None)
    }

    async fn list_due(&self, _staleness: chrono::Duration) -> Result<Vec<TrackedChannel>> {
        Err(Error::Other("database unavailable".to_string()))
    }

    async fn set_revisiting(
        &self,
        _channel_id: i64,
        _revisiting: bool,
    ) -> Result<Option<TrackedChannel>> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<TrackedChannel>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn due_query_failure_fails_the_cycle() {
    let h = harness().await;
    let scheduler = RevisitScheduler::new(
        Arc::new(UnreachableChannels),
        Arc::clone(&h.service),
        SchedulerConfig::default(),
    );

    assert!(scheduler.run_cycle().await.is_err());
}

// ---------------------------------------------------------------------------
// Loop lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn loop_survives_cycle_failures_until_stopped() {
    let h = harness().await;
    let scheduler = RevisitScheduler::new(
        Arc::new(UnreachableChannels),
        Arc::clone(&h.service),
        SchedulerConfig {
            retry_delay: Duration::from_millis(5),
            ..SchedulerConfig::default()
        },
    );

    let handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());

    scheduler.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler should stop")
        .unwrap();
    assert!(scheduler.last_run().is_none());
}

#[tokio::test]
async fn stop_interrupts_the_check_interval() {
    let h = harness().await;
    h.store.seed_channel(42, true, None);
    let scheduler = scheduler(
        &h,
        SchedulerConfig {
            check_interval: Duration::from_secs(3600),
            ..SchedulerConfig::default()
        },
    );

    let handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while scheduler.last_run().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first cycle should finish");

    scheduler.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("stop should wake the sleeping loop")
        .unwrap();

    assert!(scheduler.is_stopped());
    assert_eq!(revisit_tasks(&h, 42).len(), 1);
}
