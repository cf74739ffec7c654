//! Alarm dispatch loop.
//!
//! [`AlarmScheduler`] owns the pending-task queue behind a single mutex.
//! A background tokio task wakes every tick (or immediately when a task is
//! created or re-timed), pops every due task under the lock, and hands each
//! one to the executor on its own tokio task. Executions are gated by a
//! semaphore so a burst of alarms cannot spawn unbounded work, and the lock
//! is never held across an execution.
//!
//! A popped task stays visible to [`SchedulerControl::status`] as in flight
//! until its execution finishes, including while it waits for a permit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Notify, Semaphore};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::scheduler::control::{AlarmStatus, SchedulerControl};
use crate::scheduler::executor::AlarmExecutor;
use crate::scheduler::tasks::{AlarmTask, TaskQueue};

/// Default scan interval.
const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default cap on concurrently executing alarms.
const DEFAULT_MAX_CONCURRENT: usize = 8;

/// In-process alarm scheduler. Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct AlarmScheduler {
    queue: Arc<Mutex<TaskQueue>>,
    /// Popped tasks not yet finished, by alarm id. Locked after `queue`.
    in_flight: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    wake: Arc<Notify>,
    executor: Arc<dyn AlarmExecutor>,
    permits: Arc<Semaphore>,
    tick_interval: Duration,
}

impl AlarmScheduler {
    /// Create a scheduler that runs due tasks through `executor`.
    pub fn new(executor: Arc<dyn AlarmExecutor>) -> Self {
        Self {
            queue: Arc::new(Mutex::new(TaskQueue::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            wake: Arc::new(Notify::new()),
            executor,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
            tick_interval: DEFAULT_TICK,
        }
    }

    /// Create a scheduler using the `[scheduler]` config section.
    pub fn from_config(config: &SchedulerConfig, executor: Arc<dyn AlarmExecutor>) -> Self {
        Self::new(executor)
            .with_tick_interval(Duration::from_millis(config.tick_interval_ms))
            .with_max_concurrent_dispatches(config.max_concurrent_dispatches)
    }

    /// Override the scan interval (clamped to at least 1 ms).
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval = tick.max(Duration::from_millis(1));
        self
    }

    /// Override how many alarms may execute at once (at least 1).
    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max.max(1)));
        self
    }

    /// Start the dispatch loop. It runs until `shutdown` is cancelled.
    pub fn run(&self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            info!(
                tick_ms = this.tick_interval.as_millis() as u64,
                pending = this.pending_count(),
                "alarm scheduler started"
            );
            let mut interval = tokio::time::interval(this.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                    _ = this.wake.notified() => {}
                }
                this.dispatch_due(Utc::now());
            }
            info!("alarm scheduler stopped");
        })
    }

    /// Pop every task due at `now` and start executing it.
    ///
    /// Each task leaves the queue and enters the in-flight set under the
    /// queue lock, then is claimed by the executor before waiting for a
    /// permit, so it can never be picked up twice.
    /// Returns the number of tasks dispatched.
    pub fn dispatch_due(&self, now: DateTime<Utc>) -> usize {
        let mut dispatched = 0;
        loop {
            let next = {
                let mut queue = self.queue();
                let task = queue.pop_due(now);
                if let Some(task) = &task {
                    self.in_flight()
                        .insert(task.alarm_id.clone(), task.trigger_time);
                }
                task
            };
            let Some(task) = next else {
                break;
            };
            self.executor.claim(&task);
            self.spawn_execution(task);
            dispatched += 1;
        }
        if dispatched > 0 {
            debug!(dispatched, "due alarms dispatched");
        }
        dispatched
    }

    /// Pending tasks in firing order.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<AlarmTask> {
        self.queue().snapshot()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue().len()
    }

    /// Tasks popped for dispatch whose execution has not finished.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }

    fn spawn_execution(&self, task: AlarmTask) {
        let executor = Arc::clone(&self.executor);
        let permits = Arc::clone(&self.permits);
        let in_flight = Arc::clone(&self.in_flight);
        tokio::spawn(async move {
            let alarm_id = task.alarm_id.clone();
            let trigger_time = task.trigger_time;
            match permits.acquire_owned().await {
                Ok(_permit) => {
                    info!(alarm_id = %alarm_id, %trigger_time, "alarm firing");
                    // Inner task so a panicking executor is reported, not silently lost.
                    let run = tokio::spawn(async move { executor.execute(task).await });
                    if let Err(e) = run.await {
                        error!(alarm_id = %alarm_id, error = %e, "alarm execution panicked");
                    }
                }
                Err(_) => warn!(alarm_id = %alarm_id, "dispatch pool closed, alarm dropped"),
            }

            let mut in_flight = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            // A newer dispatch of the same id owns the entry if the times differ.
            if in_flight.get(&alarm_id) == Some(&trigger_time) {
                in_flight.remove(&alarm_id);
            }
        });
    }

    fn queue(&self) -> MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SchedulerControl for AlarmScheduler {
    async fn create(
        &self,
        alarm_id: &str,
        trigger_time: DateTime<Utc>,
        command: &str,
        plugin_list: Option<Vec<String>>,
    ) -> bool {
        let task = AlarmTask {
            alarm_id: alarm_id.to_owned(),
            trigger_time,
            command: command.to_owned(),
            plugin_list,
        };
        let replaced = self.queue().insert(task);
        self.wake.notify_one();
        info!(alarm_id, %trigger_time, replaced = replaced.is_some(), "alarm created");
        true
    }

    async fn modify(&self, alarm_id: &str, new_trigger_time: DateTime<Utc>) -> bool {
        let modified = self.queue().retime(alarm_id, new_trigger_time);
        if modified {
            self.wake.notify_one();
            info!(alarm_id, trigger_time = %new_trigger_time, "alarm modified");
        } else {
            debug!(alarm_id, "modify ignored, alarm not pending");
        }
        modified
    }

    async fn cancel(&self, alarm_id: &str) -> bool {
        if self.queue().remove(alarm_id).is_some() {
            info!(alarm_id, "alarm canceled");
        } else {
            debug!(alarm_id, "cancel for alarm that is not pending");
        }
        true
    }

    async fn snooze(&self, alarm_id: &str, delay: Duration) -> bool {
        let until = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay));
        let Some(until) = until else {
            warn!(alarm_id, delay_secs = delay.as_secs(), "snooze delay out of range");
            return false;
        };
        self.modify(alarm_id, until).await
    }

    /// Active while the task is queued or popped and still executing.
    async fn status(&self, alarm_id: &str) -> AlarmStatus {
        let queue = self.queue();
        if let Some(task) = queue.get(alarm_id) {
            return AlarmStatus::pending(task.trigger_time);
        }
        match self.in_flight().get(alarm_id) {
            Some(&trigger_time) => AlarmStatus::pending(trigger_time),
            None => AlarmStatus::inactive(),
        }
    }
}
