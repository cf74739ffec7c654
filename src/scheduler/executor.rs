//! Scheduler→actions bridge.
//!
//! The dispatch loop hands every popped task to an [`AlarmExecutor`]. The
//! production executor, [`ActionDispatch`], fans the task out through the
//! [`ActionRegistry`]. It records the alarm as `triggered` in the event
//! store when the task is claimed, before it waits for a dispatch permit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::actions::{ActionContext, ActionRegistry};
use crate::scheduler::tasks::AlarmTask;
use crate::store::{EventStatus, EventStore};

/// Runs a due alarm task.
#[async_trait]
pub trait AlarmExecutor: Send + Sync {
    /// Called synchronously as soon as `task` leaves the queue, before it
    /// waits for a permit.
    fn claim(&self, _task: &AlarmTask) {}

    async fn execute(&self, task: AlarmTask);
}

/// Executes tasks through the action registry.
pub struct ActionDispatch {
    registry: Arc<ActionRegistry>,
    store: Option<Arc<EventStore>>,
}

impl ActionDispatch {
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self {
            registry,
            store: None,
        }
    }

    /// Mark fired alarms `triggered` in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<EventStore>) -> Self {
        self.store = Some(store);
        self
    }
}

#[async_trait]
impl AlarmExecutor for ActionDispatch {
    fn claim(&self, task: &AlarmTask) {
        let Some(store) = &self.store else {
            return;
        };
        match store.mark_status(&task.alarm_id, EventStatus::Triggered) {
            Ok(true) => debug!(alarm_id = %task.alarm_id, "event marked triggered"),
            Ok(false) => debug!(alarm_id = %task.alarm_id, "no stored event for alarm"),
            Err(e) => {
                warn!(alarm_id = %task.alarm_id, error = %e, "failed to mark event triggered");
            }
        }
    }

    async fn execute(&self, task: AlarmTask) {
        let ctx = ActionContext::new(task.command.clone(), task.trigger_time);
        self.registry
            .execute_all(&task.alarm_id, &ctx, task.plugin_list.as_deref())
            .await;
    }
}
