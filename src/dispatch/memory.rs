//! In-process broker (for testing).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Broker, Delivery};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    read_count: i32,
    payload: serde_json::Value,
}

#[derive(Default)]
struct Queues {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, Entry>,
    acked: Vec<String>,
}

/// A single-queue broker held in memory. Can be switched unavailable to
/// simulate an outage, or slowed down to exercise enqueue timeouts.
pub struct MemoryBroker {
    queues: Mutex<Queues>,
    next_id: AtomicI64,
    available: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            next_id: AtomicI64::new(1),
            available: AtomicBool::new(true),
            send_delay: Mutex::new(None),
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.send_delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    /// Make every received-but-unacknowledged message visible again, as if
    /// its visibility timeout expired.
    pub fn expire_in_flight(&self) {
        let mut queues = self.lock();
        let expired: Vec<Entry> = queues.in_flight.drain().map(|(_, e)| e).collect();
        queues.ready.extend(expired);
    }

    /// Messages waiting to be received.
    pub fn ready_len(&self) -> usize {
        self.lock().ready.len()
    }

    /// Correlation ids acknowledged so far, in order.
    pub fn acked(&self) -> Vec<String> {
        self.lock().acked.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn ensure_queue(&self, _queue: &str) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _queue: &str, payload: &serde_json::Value) -> Result<String> {
        let delay = *self.send_delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::BrokerUnavailable("connection refused".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.lock().ready.push_back(Entry {
            id: id.clone(),
            read_count: 0,
            payload: payload.clone(),
        });
        Ok(id)
    }

    async fn receive(&self, _queue: &str, _visibility_timeout: i32) -> Result<Option<Delivery>> {
        let mut queues = self.lock();
        let Some(mut entry) = queues.ready.pop_front() else {
            return Ok(None);
        };
        entry.read_count += 1;
        let delivery = Delivery {
            correlation_id: entry.id.clone(),
            read_count: entry.read_count,
            payload: entry.payload.clone(),
        };
        queues.in_flight.insert(entry.id.clone(), entry);
        Ok(Some(delivery))
    }

    async fn ack(&self, _queue: &str, correlation_id: &str) -> Result<()> {
        let mut queues = self.lock();
        if queues.in_flight.remove(correlation_id).is_none() {
            return Err(Error::NotFound(format!("in-flight message {correlation_id}")));
        }
        queues.acked.push(correlation_id.to_string());
        Ok(())
    }
}
