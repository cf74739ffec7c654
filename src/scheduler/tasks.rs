//! Alarm task definitions and the pending-task queue.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A live, in-memory pending alarm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmTask {
    /// Unique identifier; at most one pending task per id.
    pub alarm_id: String,
    /// Absolute instant the alarm fires.
    pub trigger_time: DateTime<Utc>,
    /// Payload handed to actions as the alarm message.
    pub command: String,
    /// Actions to invoke. `None` or empty means every registered action.
    #[serde(default)]
    pub plugin_list: Option<Vec<String>>,
}

impl AlarmTask {
    #[must_use]
    pub fn new(
        alarm_id: impl Into<String>,
        trigger_time: DateTime<Utc>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            alarm_id: alarm_id.into(),
            trigger_time,
            command: command.into(),
            plugin_list: None,
        }
    }

    /// Restrict the task to the named actions.
    #[must_use]
    pub fn with_plugins(mut self, plugins: Vec<String>) -> Self {
        self.plugin_list = Some(plugins);
        self
    }

    /// Whether the task should fire at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.trigger_time <= now
    }
}

/// Ordering key: trigger time, then insertion sequence.
type QueueKey = (DateTime<Utc>, u64);

/// Pending tasks ordered by trigger time, indexed by alarm id.
///
/// Ties on trigger time resolve in insertion order. Re-timing a task counts
/// as a fresh insertion.
#[derive(Debug, Default)]
pub struct TaskQueue {
    order: BTreeMap<QueueKey, String>,
    tasks: HashMap<String, (QueueKey, AlarmTask)>,
    next_seq: u64,
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `task`, replacing any pending task with the same id.
    /// Returns the replaced task.
    pub fn insert(&mut self, task: AlarmTask) -> Option<AlarmTask> {
        let replaced = self.remove(&task.alarm_id);
        let key = (task.trigger_time, self.bump_seq());
        self.order.insert(key, task.alarm_id.clone());
        self.tasks.insert(task.alarm_id.clone(), (key, task));
        replaced
    }

    /// Move a pending task to `trigger_time`, keeping its payload.
    /// Returns `false` when no task is pending under `alarm_id`.
    pub fn retime(&mut self, alarm_id: &str, trigger_time: DateTime<Utc>) -> bool {
        match self.remove(alarm_id) {
            Some(mut task) => {
                task.trigger_time = trigger_time;
                self.insert(task);
                true
            }
            None => false,
        }
    }

    /// Remove and return the pending task for `alarm_id`.
    pub fn remove(&mut self, alarm_id: &str) -> Option<AlarmTask> {
        let (key, task) = self.tasks.remove(alarm_id)?;
        self.order.remove(&key);
        Some(task)
    }

    #[must_use]
    pub fn get(&self, alarm_id: &str) -> Option<&AlarmTask> {
        self.tasks.get(alarm_id).map(|(_, task)| task)
    }

    #[must_use]
    pub fn contains(&self, alarm_id: &str) -> bool {
        self.tasks.contains_key(alarm_id)
    }

    /// Earliest pending task.
    #[must_use]
    pub fn peek(&self) -> Option<&AlarmTask> {
        let (_, id) = self.order.first_key_value()?;
        self.get(id)
    }

    /// Pop the earliest task if it is due at `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<AlarmTask> {
        let id = {
            let (_, id) = self.order.first_key_value()?;
            id.clone()
        };
        if self.get(&id)?.is_due(now) {
            self.remove(&id)
        } else {
            None
        }
    }

    /// Pending tasks in firing order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AlarmTask> {
        self.order
            .values()
            .filter_map(|id| self.get(id).cloned())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }
}
