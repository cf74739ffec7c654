//! Calendar → store → scheduler reconciliation.
//!
//! One cycle:
//!
//! 1. escalate alarms that were missed while nothing was running
//! 2. fetch the calendar
//! 3. merge each fetched event into the store, suppressing events the user
//!    has snoozed
//! 4. cancel active calendar rows that disappeared from the fetch
//! 5. create or re-time scheduler tasks for active rows
//!
//! The scheduler is reached only through [`SchedulerControl`], so the same
//! engine drives an in-process scheduler or a remote one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::calendar::{CalendarEvent, CalendarSource};
use crate::config::SyncConfig;
use crate::error::{AlarmError, Result};
use crate::scheduler::SchedulerControl;
use crate::store::{Event, EventSource, EventStatus, EventStore, StoreError};

/// Suffix of the derivative row a reconciler snooze creates.
pub const SNOOZE_SUFFIX: &str = "_snooze";

/// Suffix of the system row recording a missed-alarm escalation.
pub const EMERGENCY_SUFFIX: &str = "_emergency";

/// What one cycle (or missed-alarm pass) did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tasks created for rows without a live task.
    pub created: usize,
    /// Live tasks re-timed after a calendar change.
    pub modified: usize,
    /// Rows canceled because they left the calendar.
    pub canceled: usize,
    /// Fetched events skipped because a snoozed derivative exists.
    pub suppressed: usize,
    /// Missed alarms escalated.
    pub escalated: usize,
    /// New events already in the past, recorded as `triggered`.
    pub expired: usize,
    /// Historical rows removed by retention.
    pub purged: usize,
}

impl CycleReport {
    fn absorb(&mut self, other: CycleReport) {
        self.created += other.created;
        self.modified += other.modified;
        self.canceled += other.canceled;
        self.suppressed += other.suppressed;
        self.escalated += other.escalated;
        self.expired += other.expired;
        self.purged += other.purged;
    }
}

/// The reconciliation engine.
pub struct Reconciler {
    store: Arc<EventStore>,
    scheduler: Arc<dyn SchedulerControl>,
    calendar: Arc<dyn CalendarSource>,
    config: SyncConfig,
    retention_days: u32,
    tz: Tz,
}

impl Reconciler {
    pub fn new(
        store: Arc<EventStore>,
        scheduler: Arc<dyn SchedulerControl>,
        calendar: Arc<dyn CalendarSource>,
        config: SyncConfig,
    ) -> Self {
        let tz = store.timezone();
        Self {
            store,
            scheduler,
            calendar,
            config,
            retention_days: 30,
            tz,
        }
    }

    /// Days `triggered`/`canceled` rows are kept.
    #[must_use]
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    fn plugin_list(names: &[String]) -> Option<Vec<String>> {
        (!names.is_empty()).then(|| names.to_vec())
    }

    /// Escalate every pending row older than the grace window.
    ///
    /// Each one gets an emergency task due immediately, a system row
    /// `<id>_emergency` recording the escalation, and is then marked
    /// `triggered` so a later pass leaves it alone. Rows whose task is still
    /// live in the scheduler are about to fire and are skipped.
    pub async fn missed_pass(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let missed = self.store.find_missed(now, self.config.grace())?;

        for event in missed {
            if self.scheduler.status(&event.event_id).await.active {
                debug!(event_id = %event.event_id, "overdue task still live, leaving to dispatcher");
                continue;
            }

            let emergency_id = format!("{}{EMERGENCY_SUFFIX}", event.event_id);
            let message = format!("Missed alarm: {}", event.title);
            let created = self
                .scheduler
                .create(
                    &emergency_id,
                    now,
                    &message,
                    Self::plugin_list(&self.config.emergency_actions),
                )
                .await;
            if !created {
                warn!(event_id = %event.event_id, "emergency escalation rejected, retrying next pass");
                continue;
            }

            let record = Event::derivative(
                &event,
                emergency_id.as_str(),
                now,
                self.tz,
                EventStatus::Triggered,
            );
            self.store.insert_system_event(&record)?;
            self.store
                .mark_status(&event.event_id, EventStatus::Triggered)?;
            warn!(
                event_id = %event.event_id,
                title = %event.title,
                was_due = %event.trigger_time(self.tz),
                "missed alarm escalated"
            );
            report.escalated += 1;
        }
        Ok(report)
    }

    /// Run one full cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = self.missed_pass(now).await?;

        let fetched = self.calendar.fetch_upcoming().await?;
        let previously_active = self.store.active_external_times()?;
        let grace = self.config.grace();

        let mut seen = HashSet::with_capacity(fetched.len());
        let mut to_schedule: Vec<(Event, Option<Event>)> = Vec::new();
        for cal_event in &fetched {
            seen.insert(cal_event.event_id.as_str());
            if let Some(entry) = self.merge(cal_event, now, grace, &mut report).await? {
                to_schedule.push(entry);
            }
        }

        report.absorb(self.cancel_removed(&previously_active, &seen).await?);

        for (stored, previous) in to_schedule {
            self.schedule(&stored, previous.as_ref(), &mut report).await;
        }
        report.created += self.restore_snoozed(now, grace).await?;

        report.purged = self.store.purge_history(self.retention_days, now)?;
        Ok(report)
    }

    /// Merge one fetched event into the store. Returns the stored row and the
    /// row as it was before, when the event should be scheduled.
    async fn merge(
        &self,
        cal_event: &CalendarEvent,
        now: DateTime<Utc>,
        grace: TimeDelta,
        report: &mut CycleReport,
    ) -> Result<Option<(Event, Option<Event>)>> {
        let id = cal_event.event_id.as_str();

        if self.store.has_snoozed_derivative(id)? {
            self.store.upsert_external(&Event::from(cal_event))?;
            self.store.mark_status(id, EventStatus::Triggered)?;
            self.scheduler.cancel(id).await;
            debug!(event_id = %id, "snoozed derivative present, calendar instance suppressed");
            report.suppressed += 1;
            return Ok(None);
        }

        let previous = self.store.upsert_external(&Event::from(cal_event))?;
        let stored = self
            .store
            .get(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))?;

        if previous.is_none() && stored.trigger_time(self.tz) < now - grace {
            self.store.mark_status(id, EventStatus::Triggered)?;
            debug!(event_id = %id, "new event already past, not scheduling");
            report.expired += 1;
            return Ok(None);
        }

        match stored.status {
            EventStatus::Active => Ok(Some((stored, previous))),
            EventStatus::Snoozed => {
                // Its snooze derivative has fired; the instance is done.
                self.store.mark_status(id, EventStatus::Triggered)?;
                Ok(None)
            }
            EventStatus::Triggered | EventStatus::Canceled => Ok(None),
        }
    }

    async fn cancel_removed(
        &self,
        previously_active: &HashMap<String, DateTime<Utc>>,
        seen: &HashSet<&str>,
    ) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        for id in previously_active.keys() {
            if seen.contains(id.as_str()) {
                continue;
            }
            // Only rows that are still `active` are touched.
            let Some(row) = self.store.get(id)? else {
                continue;
            };
            if row.status != EventStatus::Active {
                continue;
            }
            self.store.mark_status(id, EventStatus::Canceled)?;
            if !self.scheduler.cancel(id).await {
                warn!(event_id = %id, "scheduler cancel failed");
            }
            info!(event_id = %id, title = %row.title, "event removed from calendar, alarm canceled");
            report.canceled += 1;
        }
        Ok(report)
    }

    async fn schedule(&self, stored: &Event, previous: Option<&Event>, report: &mut CycleReport) {
        let id = stored.event_id.as_str();
        let at = stored.trigger_time(self.tz);
        let plugins = Self::plugin_list(&self.config.default_actions);

        if let Some(prev) = previous {
            let moved = prev.trigger_time(self.tz) != at;
            let renamed = prev.title != stored.title;
            if moved && !renamed && self.scheduler.modify(id, at).await {
                info!(event_id = %id, trigger_time = %at, "alarm re-timed");
                report.modified += 1;
                return;
            }
            if !moved && !renamed && self.scheduler.status(id).await.active {
                return;
            }
        } else if self.scheduler.status(id).await.active {
            return;
        }

        if self.scheduler.create(id, at, &stored.title, plugins).await {
            info!(event_id = %id, title = %stored.title, trigger_time = %at, "alarm scheduled");
            report.created += 1;
        } else {
            warn!(event_id = %id, "scheduler rejected create");
        }
    }

    /// Recreate tasks for pending snooze derivatives that have no live task,
    /// e.g. after a restart. Returns how many were created.
    async fn restore_snoozed(&self, now: DateTime<Utc>, grace: TimeDelta) -> Result<usize> {
        let mut created = 0;
        for event in self.store.list()? {
            if event.source != EventSource::System || event.status != EventStatus::Snoozed {
                continue;
            }
            let at = event.trigger_time(self.tz);
            if at < now - grace || self.scheduler.status(&event.event_id).await.active {
                continue;
            }
            if self
                .scheduler
                .create(
                    &event.event_id,
                    at,
                    &event.title,
                    Self::plugin_list(&self.config.default_actions),
                )
                .await
            {
                debug!(event_id = %event.event_id, "snoozed alarm restored");
                created += 1;
            }
        }
        Ok(created)
    }

    /// Snooze a stored event by `delay`.
    ///
    /// A calendar event is branched: a system-managed `snoozed` row
    /// `<id>_snooze` linked through `original_event_id` gets the new task,
    /// and the original's task is canceled, so the next calendar fetch does
    /// not schedule the original again. Snoozing a system row re-times it in
    /// place. Returns `false` when the event is unknown or the scheduler
    /// rejects the task.
    pub async fn snooze_event(&self, event_id: &str, delay: Duration) -> Result<bool> {
        let Some(event) = self.store.get(event_id)? else {
            return Ok(false);
        };
        let at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .ok_or_else(|| {
                AlarmError::InvalidTime(format!("snooze delay of {}s out of range", delay.as_secs()))
            })?;
        let plugins = Self::plugin_list(&self.config.default_actions);

        if event.source == EventSource::System {
            self.store.update_times(event_id, at)?;
            self.store.mark_status(event_id, EventStatus::Snoozed)?;
            let ok = self.scheduler.create(event_id, at, &event.title, plugins).await;
            info!(event_id, until = %at, "snoozed alarm re-timed");
            return Ok(ok);
        }

        let derived_id = format!("{event_id}{SNOOZE_SUFFIX}");
        let derivative = Event::derivative(
            &event,
            derived_id.as_str(),
            at,
            self.tz,
            EventStatus::Snoozed,
        );
        self.store.insert_system_event(&derivative)?;
        if event.status == EventStatus::Active {
            self.store.mark_status(event_id, EventStatus::Snoozed)?;
        }
        self.scheduler.cancel(event_id).await;
        let ok = self
            .scheduler
            .create(&derived_id, at, &event.title, plugins)
            .await;
        info!(event_id, snooze_id = %derived_id, until = %at, "alarm snoozed");
        Ok(ok)
    }

    /// Run cycles until `shutdown` fires: one immediately, then every
    /// `interval_secs`. A failed cycle is logged and retried after
    /// `failure_backoff_secs`.
    pub fn run(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.interval_secs,
                grace_secs = self.config.grace_secs,
                "reconciliation loop started"
            );
            loop {
                let wait = match self.run_cycle(Utc::now()).await {
                    Ok(report) => {
                        info!(
                            created = report.created,
                            modified = report.modified,
                            canceled = report.canceled,
                            suppressed = report.suppressed,
                            escalated = report.escalated,
                            expired = report.expired,
                            purged = report.purged,
                            "sync cycle complete"
                        );
                        self.config.interval()
                    }
                    Err(e) => {
                        error!(error = %e, "sync cycle failed");
                        self.config.failure_backoff()
                    }
                };

                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(wait) => {}
                }
            }
            info!("reconciliation loop stopped");
        })
    }
}
