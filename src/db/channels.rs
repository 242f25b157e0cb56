//! Tracked channel persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::TrackedChannel;
use crate::store::ChannelTrackingStore;

const CHANNEL_COLUMNS: &str = "id, channel_id, revisiting, last_revisited, created_at";

#[async_trait]
impl ChannelTrackingStore for super::Db {
    async fn get(&self, channel_id: i64) -> Result<Option<TrackedChannel>> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM tracked_channels WHERE channel_id = $1"
        ))
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(TrackedChannel::from))
    }

    async fn add(&self, channel_id: i64) -> Result<TrackedChannel> {
        let now = Utc::now();
        let inserted: Option<ChannelRow> = sqlx::query_as(&format!(
            "INSERT INTO tracked_channels (channel_id, revisiting, last_revisited, created_at)
             VALUES ($1, TRUE, $2, $2)
             ON CONFLICT (channel_id) DO NOTHING
             RETURNING {CHANNEL_COLUMNS}"
        ))
        .bind(channel_id)
        .bind(now)
        .fetch_optional(self.pool())
        .await?;

        match inserted {
            Some(row) => Ok(row.into()),
            None => {
                // Lost a race with a concurrent add; return the winner's row.
                let row: ChannelRow = sqlx::query_as(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM tracked_channels WHERE channel_id = $1"
                ))
                .bind(channel_id)
                .fetch_one(self.pool())
                .await?;
                Ok(row.into())
            }
        }
    }

    async fn update_last_revisited(&self, channel_id: i64) -> Result<Option<TrackedChannel>> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "UPDATE tracked_channels SET last_revisited = $1 WHERE channel_id = $2
             RETURNING {CHANNEL_COLUMNS}"
        ))
        .bind(Utc::now())
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(TrackedChannel::from))
    }

    async fn list_due(&self, staleness: chrono::Duration) -> Result<Vec<TrackedChannel>> {
        let cutoff = Utc::now() - staleness;
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM tracked_channels
             WHERE revisiting AND (last_revisited IS NULL OR last_revisited <= $1)
             ORDER BY last_revisited NULLS FIRST, id"
        ))
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(TrackedChannel::from).collect())
    }

    async fn set_revisiting(
        &self,
        channel_id: i64,
        revisiting: bool,
    ) -> Result<Option<TrackedChannel>> {
        let row: Option<ChannelRow> = sqlx::query_as(&format!(
            "UPDATE tracked_channels SET revisiting = $1 WHERE channel_id = $2
             RETURNING {CHANNEL_COLUMNS}"
        ))
        .bind(revisiting)
        .bind(channel_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(TrackedChannel::from))
    }

    async fn list(&self) -> Result<Vec<TrackedChannel>> {
        let rows: Vec<ChannelRow> = sqlx::query_as(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM tracked_channels ORDER BY channel_id"
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(TrackedChannel::from).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: i64,
    channel_id: i64,
    revisiting: bool,
    last_revisited: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<ChannelRow> for TrackedChannel {
    fn from(row: ChannelRow) -> Self {
        Self {
            id: row.id,
            channel_id: row.channel_id,
            revisiting: row.revisiting,
            last_revisited: row.last_revisited,
            created_at: row.created_at,
        }
    }
}
