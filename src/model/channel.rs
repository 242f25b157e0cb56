//! Tracked channel types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A channel under periodic monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedChannel {
    pub id: i64,
    pub channel_id: i64,
    /// Whether the scheduler should revisit this channel.
    pub revisiting: bool,
    pub last_revisited: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackedChannel {
    /// Due for revisit at `now` given the staleness interval?
    pub fn is_due(&self, now: DateTime<Utc>, staleness: chrono::Duration) -> bool {
        self.revisiting
            && self
                .last_revisited
                .is_none_or(|last| last <= now - staleness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(revisiting: bool, last_revisited: Option<DateTime<Utc>>) -> TrackedChannel {
        TrackedChannel {
            id: 1,
            channel_id: 42,
            revisiting,
            last_revisited,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn never_revisited_channel_is_due() {
        assert!(channel(true, None).is_due(Utc::now(), chrono::Duration::minutes(360)));
    }

    #[test]
    fn paused_channel_is_never_due() {
        assert!(!channel(false, None).is_due(Utc::now(), chrono::Duration::minutes(360)));
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let now = Utc::now();
        let staleness = chrono::Duration::minutes(360);
        assert!(channel(true, Some(now - staleness)).is_due(now, staleness));
        assert!(
            !channel(true, Some(now - staleness + chrono::Duration::seconds(1)))
                .is_due(now, staleness)
        );
    }
}
