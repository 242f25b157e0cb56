//! Shared fixtures: in-memory store and broker wiring, stub backends.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use channel_tasks::backend::{BackendReply, NotificationBackend, TrackingBackend};
use channel_tasks::dispatch::memory::MemoryBroker;
use channel_tasks::dispatch::{Delivery, Dispatcher, DispatcherConfig};
use channel_tasks::engine::{Worker, WorkerConfig, WorkerMiddleware};
use channel_tasks::error::{Error, Result};
use channel_tasks::executor::ExecutorTable;
use channel_tasks::service::TaskService;
use channel_tasks::store::memory::MemoryStore;

/// Tracking service stub. Records every call; replies with failure when
/// switched to failing.
#[derive(Default)]
pub struct StubTracking {
    failing: AtomicBool,
    calls: Mutex<Vec<(&'static str, i64)>>,
}

impl StubTracking {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let stub = Self::default();
        stub.failing.store(true, Ordering::SeqCst);
        Arc::new(stub)
    }

    pub fn calls(&self) -> Vec<(&'static str, i64)> {
        self.calls.lock().unwrap().clone()
    }

    fn reply(&self, action: &'static str, channel_id: i64) -> BackendReply {
        self.calls.lock().unwrap().push((action, channel_id));
        if self.failing.load(Ordering::SeqCst) {
            BackendReply {
                success: false,
                message: "channel unavailable".to_string(),
            }
        } else {
            BackendReply {
                success: true,
                message: "ok".to_string(),
            }
        }
    }
}

#[async_trait]
impl TrackingBackend for StubTracking {
    async fn start_tracking(&self, channel_id: i64) -> Result<BackendReply> {
        Ok(self.reply("track", channel_id))
    }

    async fn revisit(&self, channel_id: i64) -> Result<BackendReply> {
        Ok(self.reply("revisit", channel_id))
    }
}

#[derive(Clone, Copy)]
enum NotifyMode {
    Accept,
    Reject,
    Error,
}

/// Notification service stub. Records every message it was asked to send.
pub struct StubNotifier {
    mode: NotifyMode,
    sent: Mutex<Vec<(i64, String)>>,
}

impl StubNotifier {
    fn with_mode(mode: NotifyMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::with_mode(NotifyMode::Accept)
    }

    pub fn rejecting() -> Arc<Self> {
        Self::with_mode(NotifyMode::Reject)
    }

    pub fn erroring() -> Arc<Self> {
        Self::with_mode(NotifyMode::Error)
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationBackend for StubNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<bool> {
        self.sent.lock().unwrap().push((user_id, text.to_string()));
        match self.mode {
            NotifyMode::Accept => Ok(true),
            NotifyMode::Reject => Ok(false),
            NotifyMode::Error => Err(Error::Backend("notification service down".to_string())),
        }
    }
}

/// Store, broker, dispatcher and service wired together in memory.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
    pub dispatcher: Arc<Dispatcher>,
    pub service: Arc<TaskService>,
}

pub async fn harness() -> Harness {
    harness_with(DispatcherConfig::default()).await
}

pub async fn harness_with(config: DispatcherConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let broker = Arc::new(MemoryBroker::new());
    let dispatcher = Arc::new(
        Dispatcher::open(broker.clone(), config)
            .await
            .expect("memory broker always opens"),
    );
    let service = Arc::new(TaskService::new(store.clone(), Arc::clone(&dispatcher)));
    Harness {
        store,
        broker,
        dispatcher,
        service,
    }
}

impl Harness {
    pub fn middleware(&self, notifier: Option<Arc<StubNotifier>>) -> WorkerMiddleware {
        let notifier = notifier.map(|n| n as Arc<dyn NotificationBackend>);
        WorkerMiddleware::new(self.store.clone(), self.store.clone(), notifier)
    }

    pub fn worker(&self, tracking: Arc<StubTracking>, notifier: Arc<StubNotifier>) -> Worker {
        Worker::new(
            Arc::clone(&self.dispatcher),
            Arc::new(self.middleware(Some(notifier))),
            Arc::new(ExecutorTable::with_tracking_backend(tracking)),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                max_concurrent: 2,
            },
        )
    }

    /// Take the next queued delivery, failing the test if there is none.
    pub async fn next_delivery(&self) -> Delivery {
        self.dispatcher
            .receive()
            .await
            .unwrap()
            .expect("a queued delivery")
    }
}
