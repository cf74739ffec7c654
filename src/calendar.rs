//! Calendar collaborator boundary.
//!
//! The reconciliation engine only sees [`CalendarSource::fetch_upcoming`]: a
//! list of alarm-worthy events, already filtered, in the display timezone,
//! sorted by `(date, start_time)`. Implementations:
//!
//! - [`StaticCalendar`] holds a swappable in-memory list (tests, manual runs)
//! - [`JsonFeedCalendar`] reads a normalized JSON event list from a file or URL
//! - [`MultiCalendar`] merges several sources

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlarmError, Result};
use crate::store::Event;

/// Days ahead a feed is read, counting from today.
pub const DEFAULT_HORIZON_DAYS: i64 = 7;

/// One upcoming occurrence as delivered by a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub event_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub title: String,
}

impl CalendarEvent {
    #[must_use]
    pub fn new(
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
        }
    }
}

impl From<&CalendarEvent> for Event {
    fn from(ev: &CalendarEvent) -> Self {
        Event::external(
            ev.event_id.clone(),
            ev.date,
            ev.start_time,
            ev.end_time,
            ev.title.clone(),
        )
    }
}

/// Per-occurrence id for a recurring event: `UID:MM-DD`.
#[must_use]
pub fn instance_event_id(uid: &str, date: NaiveDate) -> String {
    format!("{uid}:{}", date.format("%m-%d"))
}

/// Sort events by `(date, start_time)`, the order every source returns.
pub fn sort_events(events: &mut [CalendarEvent]) {
    events.sort_by(|a, b| {
        (a.date, a.start_time, &a.event_id).cmp(&(b.date, b.start_time, &b.event_id))
    });
}

/// Produces the current list of upcoming alarm-worthy events.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    async fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>>;
}

// ---------------------------------------------------------------------------
// StaticCalendar
// ---------------------------------------------------------------------------

/// In-memory calendar whose contents can be swapped between fetches.
#[derive(Debug, Default, Clone)]
pub struct StaticCalendar {
    events: Arc<Mutex<Vec<CalendarEvent>>>,
}

impl StaticCalendar {
    #[must_use]
    pub fn new(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: Arc::new(Mutex::new(events)),
        }
    }

    /// Replace the calendar contents.
    pub fn set_events(&self, events: Vec<CalendarEvent>) {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = events;
    }
}

#[async_trait]
impl CalendarSource for StaticCalendar {
    async fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>> {
        let mut events = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        sort_events(&mut events);
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// JsonFeedCalendar
// ---------------------------------------------------------------------------

/// Where a JSON feed lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedLocation {
    File(PathBuf),
    Url(String),
}

impl FeedLocation {
    /// `http://` and `https://` are URLs; anything else is a file path.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        if spec.starts_with("http://") || spec.starts_with("https://") {
            Self::Url(spec.to_owned())
        } else {
            Self::File(PathBuf::from(spec))
        }
    }
}

/// Feed record. Either `event_id` or `uid` must be present; a bare `uid`
/// becomes a per-occurrence id via [`instance_event_id`].
#[derive(Debug, Clone, Deserialize)]
struct FeedEntry {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    uid: Option<String>,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    #[serde(default)]
    title: String,
}

impl FeedEntry {
    fn into_event(self) -> Result<CalendarEvent> {
        let event_id = match (self.event_id, self.uid) {
            (Some(id), _) if !id.trim().is_empty() => id,
            (_, Some(uid)) if !uid.trim().is_empty() => instance_event_id(&uid, self.date),
            _ => {
                return Err(AlarmError::Calendar(format!(
                    "feed entry `{}` on {} has neither event_id nor uid",
                    self.title, self.date
                )));
            }
        };
        Ok(CalendarEvent {
            event_id,
            date: self.date,
            start_time: self.start_time,
            end_time: self.end_time,
            title: self.title,
        })
    }
}

/// Reads a JSON array of already-normalized events.
#[derive(Debug, Clone)]
pub struct JsonFeedCalendar {
    location: FeedLocation,
    tz: Tz,
    horizon_days: i64,
    client: reqwest::Client,
}

impl JsonFeedCalendar {
    /// `spec` is a file path or an `http(s)` URL; `tz` decides what "today" is.
    #[must_use]
    pub fn new(spec: &str, tz: Tz) -> Self {
        Self {
            location: FeedLocation::parse(spec),
            tz,
            horizon_days: DEFAULT_HORIZON_DAYS,
            client: reqwest::Client::new(),
        }
    }

    /// Keep events from today through `days` days ahead.
    #[must_use]
    pub fn with_horizon_days(mut self, days: i64) -> Self {
        self.horizon_days = days.max(0);
        self
    }

    #[must_use]
    pub fn location(&self) -> &FeedLocation {
        &self.location
    }

    async fn read_body(&self) -> Result<String> {
        match &self.location {
            FeedLocation::File(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                AlarmError::Calendar(format!("cannot read feed {}: {e}", path.display()))
            }),
            FeedLocation::Url(url) => {
                let resp = self.client.get(url).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(AlarmError::Calendar(format!(
                        "feed {url} answered HTTP {status}"
                    )));
                }
                Ok(resp.text().await?)
            }
        }
    }
}

#[async_trait]
impl CalendarSource for JsonFeedCalendar {
    async fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>> {
        let body = self.read_body().await?;
        let entries: Vec<FeedEntry> = serde_json::from_str(&body)
            .map_err(|e| AlarmError::Calendar(format!("malformed feed: {e}")))?;

        let today = Utc::now().with_timezone(&self.tz).date_naive();
        let last = today + TimeDelta::days(self.horizon_days);
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let event = entry.into_event()?;
            if event.date >= today && event.date <= last {
                events.push(event);
            }
        }
        sort_events(&mut events);
        debug!(feed = ?self.location, count = events.len(), "calendar feed read");
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// MultiCalendar
// ---------------------------------------------------------------------------

/// Concatenates several sources. Any failing source fails the fetch, so a
/// cycle never mistakes an unreachable calendar for deleted events.
#[derive(Default)]
pub struct MultiCalendar {
    sources: Vec<Box<dyn CalendarSource>>,
}

impl MultiCalendar {
    #[must_use]
    pub fn new(sources: Vec<Box<dyn CalendarSource>>) -> Self {
        Self { sources }
    }

    /// One [`JsonFeedCalendar`] per feed spec.
    #[must_use]
    pub fn from_feeds(feeds: &[String], tz: Tz) -> Self {
        Self::new(
            feeds
                .iter()
                .map(|spec| Box::new(JsonFeedCalendar::new(spec, tz)) as Box<dyn CalendarSource>)
                .collect(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl CalendarSource for MultiCalendar {
    async fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>> {
        let mut all = Vec::new();
        for source in &self.sources {
            all.extend(source.fetch_upcoming().await?);
        }
        sort_events(&mut all);
        all.dedup_by(|a, b| a.event_id == b.event_id);
        Ok(all)
    }
}
