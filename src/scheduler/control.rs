//! The scheduler control contract shared by the in-process scheduler and
//! the HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot returned by [`SchedulerControl::status`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmStatus {
    /// Whether a task is pending under the id, or popped and not yet
    /// finished executing.
    pub active: bool,
    /// When it will fire (ISO-8601), if pending.
    pub next_trigger: Option<DateTime<Utc>>,
}

impl AlarmStatus {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending(at: DateTime<Utc>) -> Self {
        Self {
            active: true,
            next_trigger: Some(at),
        }
    }
}

/// Create/modify/cancel/snooze/status over pending alarm tasks.
///
/// Mutating calls answer with a plain success flag. `cancel` succeeds for
/// unknown ids; `modify` and `snooze` fail when nothing is pending.
#[async_trait]
pub trait SchedulerControl: Send + Sync {
    /// Insert or atomically replace the task for `alarm_id`.
    async fn create(
        &self,
        alarm_id: &str,
        trigger_time: DateTime<Utc>,
        command: &str,
        plugin_list: Option<Vec<String>>,
    ) -> bool;

    /// Re-time a pending task, keeping its payload.
    async fn modify(&self, alarm_id: &str, new_trigger_time: DateTime<Utc>) -> bool;

    /// Remove a pending task if present.
    async fn cancel(&self, alarm_id: &str) -> bool;

    /// Push a pending task back to `now + delay`.
    async fn snooze(&self, alarm_id: &str, delay: Duration) -> bool;

    async fn status(&self, alarm_id: &str) -> AlarmStatus;
}
