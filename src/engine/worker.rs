//! Worker loop: pulls deliveries from the dispatcher and runs each one
//! through before-hook → executor → after-hook → ack.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::{Notify, Semaphore};
use tracing::{Instrument, error, info, warn};

use super::middleware::WorkerMiddleware;
use crate::dispatch::{Delivery, Dispatcher};
use crate::error::{Error, Result};
use crate::executor::ExecutorTable;
use crate::telemetry::metrics;
use crate::telemetry::task::start_task_span;

/// Configuration for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait before polling again when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum deliveries executing at once.
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent: 4,
        }
    }
}

pub struct Worker {
    dispatcher: Arc<Dispatcher>,
    middleware: Arc<WorkerMiddleware>,
    executors: Arc<ExecutorTable>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    permits: Arc<Semaphore>,
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            middleware: Arc::clone(&self.middleware),
            executors: Arc::clone(&self.executors),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl Worker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        middleware: Arc<WorkerMiddleware>,
        executors: Arc<ExecutorTable>,
        mut config: WorkerConfig,
    ) -> Self {
        config.max_concurrent = config.max_concurrent.max(1);
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            dispatcher,
            middleware,
            executors,
            config,
            shutdown: Arc::new(Notify::new()),
            permits,
        }
    }

    /// Signal the worker loop to stop taking new deliveries.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until shutdown. In-flight deliveries finish
    /// before this returns.
    pub async fn run(&self) -> Result<()> {
        info!(
            queue = self.dispatcher.queue_name(),
            max_concurrent = self.config.max_concurrent,
            "worker started"
        );

        loop {
            let permit = tokio::select! {
                _ = self.shutdown.notified() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    permit.map_err(|e| Error::Other(format!("worker semaphore closed: {e}")))?
                }
            };

            let delivery = match self.dispatcher.receive().await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    drop(permit);
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    error!("receive error: {e}");
                    drop(permit);
                    if self.idle().await {
                        break;
                    }
                    continue;
                }
            };

            let worker = self.clone();
            tokio::spawn(async move {
                worker.process(delivery).await;
                drop(permit);
            });
        }

        info!("worker shutting down, waiting for in-flight tasks");
        let _drained = self
            .permits
            .acquire_many(self.config.max_concurrent as u32)
            .await;
        info!("worker stopped");
        Ok(())
    }

    /// Receive and process a single delivery inline. Returns whether one
    /// was available.
    pub async fn run_once(&self) -> Result<bool> {
        match self.dispatcher.receive().await? {
            Some(delivery) => {
                self.process(delivery).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Sleep for the poll interval. Returns true if shutdown arrived first.
    async fn idle(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.notified() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    /// Run one delivery through the hooks and its executor, then ack it.
    ///
    /// Failed executions are acked too: a Failed task is terminal and is
    /// never retried from the same message.
    pub async fn process(&self, delivery: Delivery) {
        let message = match delivery.message() {
            Ok(message) => message,
            Err(e) => {
                warn!(
                    correlation_id = %delivery.correlation_id,
                    "undecodable task payload, archiving: {e}"
                );
                self.ack(&delivery).await;
                return;
            }
        };

        let span = start_task_span(message.task_type, &delivery.correlation_id);
        async {
            let started = Instant::now();
            self.middleware.before_execute(&delivery).await;

            let outcome = self.executors.execute(&message).await;
            let error = match &outcome {
                Ok(_) => None,
                Err(e) => {
                    error!(
                        channel_id = message.channel_id,
                        task_type = %message.task_type,
                        "task execution failed: {e}"
                    );
                    Some(e.to_string())
                }
            };

            let task = self
                .middleware
                .after_execute(&delivery, error.as_deref())
                .await;

            metrics::execution_duration_ms().record(
                started.elapsed().as_secs_f64() * 1000.0,
                &[
                    KeyValue::new("task_type", message.task_type.as_str()),
                    KeyValue::new(
                        "status",
                        task.map(|t| t.status.as_str()).unwrap_or("unknown"),
                    ),
                ],
            );

            self.ack(&delivery).await;
        }
        .instrument(span)
        .await
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.dispatcher.ack(delivery).await {
            error!(
                correlation_id = %delivery.correlation_id,
                "ack failed, message will be redelivered: {e}"
            );
        }
    }
}
