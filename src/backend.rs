//! External backends the executors and completion hooks call into.
//!
//! Backends are assumed idempotent per channel id, which is what makes
//! at-least-once delivery safe.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use http::{HttpNotificationClient, HttpTrackingClient};

/// Outcome reported by the tracking service for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Channel intelligence service: does the actual tracking work.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    /// Begin tracking a channel. Errors only on transport failure.
    async fn start_tracking(&self, channel_id: i64) -> Result<BackendReply>;

    /// Refresh a tracked channel. Errors only on transport failure.
    async fn revisit(&self, channel_id: i64) -> Result<BackendReply>;
}

/// User notification service.
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Send `text` to a user. Returns whether the service accepted it.
    async fn notify(&self, user_id: i64, text: &str) -> Result<bool>;
}
