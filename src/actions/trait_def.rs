//! The [`AlarmAction`] capability implemented by every trigger action.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::ActionError;

/// What an action is told about the alarm it fires for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionContext {
    /// Human-readable message, taken from the task's command/payload.
    pub message: String,
    /// When the alarm was scheduled to go off.
    pub trigger_time: DateTime<Utc>,
}

impl ActionContext {
    #[must_use]
    pub fn new(message: impl Into<String>, trigger_time: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            trigger_time,
        }
    }
}

/// A pluggable trigger behaviour (sound, notification, escalation).
///
/// Actions are brought up once with [`initialize`](Self::initialize), fired
/// any number of times with [`execute`](Self::execute), and shut down once
/// with [`cleanup`](Self::cleanup). Each may fail independently; the
/// registry isolates failures so one broken action never silences the rest.
#[async_trait]
pub trait AlarmAction: Send + Sync {
    /// Unique name within a registry (e.g. `"desk-notify"`).
    fn name(&self) -> &str;

    /// Prepare resources. An error keeps the action out of the active set.
    async fn initialize(&mut self) -> Result<(), ActionError> {
        Ok(())
    }

    /// Fire for `alarm_id`.
    async fn execute(&self, alarm_id: &str, ctx: &ActionContext) -> Result<(), ActionError>;

    /// Release resources at shutdown.
    async fn cleanup(&self) -> Result<(), ActionError> {
        Ok(())
    }
}
