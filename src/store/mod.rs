//! Persistent event store.
//!
//! One SQLite table of alarm-worthy events with a lifecycle status. Times
//! are written in UTC and converted to the configured display timezone on
//! the way in and out, so every persisted comparison is zone-unambiguous.

pub mod schema;
pub mod sqlite;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time_spec::resolve_local;

pub use sqlite::EventStore;

/// Lifecycle status of a stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Waiting to fire.
    Active,
    /// Fired (or escalated); never re-armed by a re-sync.
    Triggered,
    /// The user pushed it back; a system derivative carries the new time.
    Snoozed,
    /// Disappeared from the calendar before firing.
    Canceled,
}

impl EventStatus {
    /// Column representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Triggered => "triggered",
            Self::Snoozed => "snoozed",
            Self::Canceled => "canceled",
        }
    }

    /// Parse the column representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "triggered" => Some(Self::Triggered),
            "snoozed" => Some(Self::Snoozed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Synced from the calendar.
    External,
    /// Created by the engine (snooze derivative, emergency escalation).
    System,
}

impl EventSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::System => "system",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "external" => Some(Self::External),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A stored alarm-worthy occurrence.
///
/// `date`, `start_time` and `end_time` are wall-clock values in the store's
/// display timezone. An `end_time` earlier than `start_time` means the event
/// ends on the following day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub title: String,
    pub is_system_managed: bool,
    pub status: EventStatus,
    pub source: EventSource,
    /// Back-reference from a snooze or emergency derivative to its origin.
    pub original_event_id: Option<String>,
}

impl Event {
    /// A new calendar-sourced event in `active` status.
    #[must_use]
    pub fn external(
        event_id: impl Into<String>,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        title: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            date,
            start_time,
            end_time,
            title: title.into(),
            is_system_managed: false,
            status: EventStatus::Active,
            source: EventSource::External,
            original_event_id: None,
        }
    }

    /// A system-managed derivative of `origin` starting at `at` (in `tz`).
    #[must_use]
    pub fn derivative(
        origin: &Event,
        event_id: impl Into<String>,
        at: DateTime<Utc>,
        tz: Tz,
        status: EventStatus,
    ) -> Self {
        let local = at.with_timezone(&tz).naive_local();
        let length = origin.end_naive() - origin.start_naive();
        Self {
            event_id: event_id.into(),
            date: local.date(),
            start_time: local.time(),
            end_time: (local + length).time(),
            title: origin.title.clone(),
            is_system_managed: true,
            status,
            source: EventSource::System,
            original_event_id: Some(origin.event_id.clone()),
        }
    }

    /// Local start as a naive datetime.
    #[must_use]
    pub fn start_naive(&self) -> chrono::NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// Local end as a naive datetime, rolling over midnight when needed.
    #[must_use]
    pub fn end_naive(&self) -> chrono::NaiveDateTime {
        let end = self.date.and_time(self.end_time);
        if self.end_time < self.start_time {
            end + chrono::TimeDelta::days(1)
        } else {
            end
        }
    }

    /// Absolute alarm instant, resolving the wall-clock start in `tz`.
    #[must_use]
    pub fn trigger_time(&self, tz: Tz) -> DateTime<Utc> {
        resolve_local(tz, self.start_naive())
    }
}

/// Errors from the SQLite event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("event not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    /// A row holds a value this version cannot interpret.
    #[error("corrupt row {event_id}: {reason}")]
    Corrupt { event_id: String, reason: String },
}
