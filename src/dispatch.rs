//! Dispatcher: hands tasks to the message broker and pulls deliveries back.
//!
//! The dispatcher is an owned value with an explicit open/close lifecycle,
//! shared by `Arc` between the task service and the worker. Delivery is
//! at-least-once; a message is acknowledged only after its hooks ran.

pub mod memory;
pub mod pgmq;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{TaskMessage, TaskType};

/// A message handed back by the broker for execution.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned id; matches `Task::message_id` once the service has
    /// recorded it.
    pub correlation_id: String,
    /// How many times this message has been handed out, this time included.
    pub read_count: i32,
    pub payload: serde_json::Value,
}

impl Delivery {
    /// Decode the task payload.
    pub fn message(&self) -> Result<TaskMessage> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    pub fn is_redelivery(&self) -> bool {
        self.read_count > 1
    }
}

/// Queue transport underneath the dispatcher.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the queue if it does not exist.
    async fn ensure_queue(&self, queue: &str) -> Result<()>;

    /// Send a payload; returns the broker-assigned correlation id.
    async fn send(&self, queue: &str, payload: &serde_json::Value) -> Result<String>;

    /// Take the next visible message, hiding it for `visibility_timeout`
    /// seconds. Unacknowledged messages become visible again afterwards.
    async fn receive(&self, queue: &str, visibility_timeout: i32) -> Result<Option<Delivery>>;

    /// Remove a message from the live queue.
    async fn ack(&self, queue: &str, correlation_id: &str) -> Result<()>;
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_name: String,
    /// Upper bound on a single enqueue call.
    pub enqueue_timeout: Duration,
    /// Seconds a received message stays hidden before redelivery.
    pub visibility_timeout: i32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_name: "channel_tasks".to_string(),
            enqueue_timeout: Duration::from_secs(10),
            visibility_timeout: 60,
        }
    }
}

pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    config: DispatcherConfig,
    open: AtomicBool,
}

impl Dispatcher {
    /// Open the dispatcher, making sure its queue exists.
    pub async fn open(broker: Arc<dyn Broker>, config: DispatcherConfig) -> Result<Self> {
        broker.ensure_queue(&config.queue_name).await?;
        info!(queue = %config.queue_name, "dispatcher opened");
        Ok(Self {
            broker,
            config,
            open: AtomicBool::new(true),
        })
    }

    /// Close the dispatcher. Later enqueues fail with `BrokerUnavailable`.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            info!(queue = %self.config.queue_name, "dispatcher closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn queue_name(&self) -> &str {
        &self.config.queue_name
    }

    /// Enqueue a task for asynchronous execution. Returns the correlation id.
    ///
    /// Any broker failure, including the enqueue timeout, surfaces as
    /// [`Error::BrokerUnavailable`].
    pub async fn enqueue(&self, task_type: TaskType, channel_id: i64) -> Result<String> {
        if !self.is_open() {
            return Err(Error::BrokerUnavailable("dispatcher is closed".to_string()));
        }

        let payload = serde_json::to_value(TaskMessage {
            task_type,
            channel_id,
        })?;

        let sent = tokio::time::timeout(
            self.config.enqueue_timeout,
            self.broker.send(&self.config.queue_name, &payload),
        )
        .await;

        match sent {
            Ok(Ok(correlation_id)) => {
                debug!(%task_type, channel_id, %correlation_id, "task enqueued");
                Ok(correlation_id)
            }
            Ok(Err(Error::BrokerUnavailable(reason))) => Err(Error::BrokerUnavailable(reason)),
            Ok(Err(e)) => Err(Error::BrokerUnavailable(e.to_string())),
            Err(_) => Err(Error::BrokerUnavailable(format!(
                "enqueue timed out after {:?}",
                self.config.enqueue_timeout
            ))),
        }
    }

    /// Take the next delivery, if any.
    pub async fn receive(&self) -> Result<Option<Delivery>> {
        self.broker
            .receive(&self.config.queue_name, self.config.visibility_timeout)
            .await
    }

    /// Acknowledge a delivery so it is not handed out again.
    pub async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.broker
            .ack(&self.config.queue_name, &delivery.correlation_id)
            .await
    }
}
