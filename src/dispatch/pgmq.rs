//! pgmq-backed broker on the shared Postgres pool.

use async_trait::async_trait;

use super::{Broker, Delivery};
use crate::db::Db;
use crate::error::{Error, Result};

/// Broker over pgmq. Correlation ids are pgmq message ids in decimal.
#[derive(Clone)]
pub struct PgmqBroker {
    db: Db,
}

impl PgmqBroker {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn parse_msg_id(correlation_id: &str) -> Result<i64> {
    correlation_id
        .parse()
        .map_err(|_| Error::Validation(format!("not a pgmq message id: {correlation_id}")))
}

#[async_trait]
impl Broker for PgmqBroker {
    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        self.db.create_queue(queue).await
    }

    async fn send(&self, queue: &str, payload: &serde_json::Value) -> Result<String> {
        self.db
            .send_to_queue(queue, payload)
            .await
            .map(|msg_id| msg_id.to_string())
            .map_err(|e| match e {
                Error::Database(e) => Error::BrokerUnavailable(e.to_string()),
                other => other,
            })
    }

    async fn receive(&self, queue: &str, visibility_timeout: i32) -> Result<Option<Delivery>> {
        let msg = self.db.read_from_queue(queue, visibility_timeout).await?;
        Ok(msg.map(|m| Delivery {
            correlation_id: m.msg_id.to_string(),
            read_count: m.read_ct,
            payload: m.message,
        }))
    }

    async fn ack(&self, queue: &str, correlation_id: &str) -> Result<()> {
        self.db
            .archive_message(queue, parse_msg_id(correlation_id)?)
            .await
    }
}
