//! JSON-over-HTTP clients for the tracking and notification services.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{BackendReply, NotificationBackend, TrackingBackend};
use crate::error::Result;

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn trim_base(base_url: impl Into<String>) -> String {
    base_url.into().trim_end_matches('/').to_string()
}

/// Client for the channel intelligence service.
#[derive(Debug, Clone)]
pub struct HttpTrackingClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTrackingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }

    async fn post(&self, channel_id: i64, action: &str) -> Result<BackendReply> {
        let url = format!("{}/channels/{channel_id}/{action}", self.base_url);
        debug!(%url, "calling tracking service");
        let reply: BackendReply = self
            .client
            .post(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if !reply.success {
            warn!(channel_id, action, message = %reply.message, "tracking service reported failure");
        }
        Ok(reply)
    }
}

#[async_trait]
impl TrackingBackend for HttpTrackingClient {
    async fn start_tracking(&self, channel_id: i64) -> Result<BackendReply> {
        self.post(channel_id, "track").await
    }

    async fn revisit(&self, channel_id: i64) -> Result<BackendReply> {
        self.post(channel_id, "revisit").await
    }
}

/// Client for the user notification service.
#[derive(Debug, Clone)]
pub struct HttpNotificationClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NotifyReply {
    success: bool,
}

impl HttpNotificationClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: trim_base(base_url),
        })
    }
}

#[async_trait]
impl NotificationBackend for HttpNotificationClient {
    async fn notify(&self, user_id: i64, text: &str) -> Result<bool> {
        let url = format!("{}/users/{user_id}/notify", self.base_url);
        let reply: NotifyReply = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "message": text }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.success)
    }
}
