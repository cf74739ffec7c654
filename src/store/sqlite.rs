//! SQLite-backed event store.
//!
//! A single `Mutex<Connection>` serializes every access; multi-statement
//! sequences (bulk replace, upsert-with-previous, re-time) additionally run
//! inside one transaction so readers never see a half-applied change.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use rusqlite::{Connection, params};

use super::schema::{apply_schema, read_schema_version};
use super::{Event, EventSource, EventStatus, StoreError};
use crate::time_spec::{resolve_local, to_local};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_EVENTS: &str = "SELECT event_id, date, start_time, end_time, title, \
     is_system_managed, status, source, original_event_id FROM events";

const INSERT_OR_REPLACE: &str = "INSERT OR REPLACE INTO events \
     (event_id, date, start_time, end_time, title, is_system_managed, status, source, \
      original_event_id) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// Rows that still have an alarm ahead of them: live calendar events and
/// snooze derivatives that have not fired yet.
const PENDING: &str = "(status = 'active' OR (status = 'snoozed' AND is_system_managed = 1))";

/// Persistent table of alarm events.
///
/// All wall-clock values cross this boundary in the display timezone `tz`
/// and are stored in UTC.
pub struct EventStore {
    conn: Mutex<Connection>,
    tz: Tz,
}

impl EventStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path, tz: Tz) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, tz)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory(tz: Tz) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, tz)
    }

    fn with_connection(conn: Connection, tz: Tz) -> Result<Self, StoreError> {
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            tz,
        })
    }

    /// Display timezone used for reads and writes.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let conn = self.lock()?;
        Ok(read_schema_version(&conn)?)
    }

    /// Replace every calendar-sourced row with `events` in one transaction.
    ///
    /// System-managed rows (snooze and emergency derivatives) are kept so
    /// their `original_event_id` links survive.
    pub fn replace_all(&self, events: &[Event]) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM events WHERE source = 'external'", [])?;
        {
            let mut stmt = tx.prepare(INSERT_OR_REPLACE)?;
            for ev in events {
                let cols = UtcColumns::from_event(ev, self.tz);
                stmt.execute(params![
                    ev.event_id,
                    cols.date,
                    cols.start_time,
                    cols.end_time,
                    ev.title,
                    ev.is_system_managed,
                    ev.status.as_str(),
                    ev.source.as_str(),
                    ev.original_event_id,
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// Earliest pending event whose start is no older than `now - grace`.
    pub fn next_due(
        &self,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Result<Option<Event>, StoreError> {
        let cutoff = stamp(now - grace);
        let conn = self.lock()?;
        let sql = format!(
            "{SELECT_EVENTS} WHERE (date || ' ' || start_time) >= ?1 AND {PENDING} \
             ORDER BY date, start_time LIMIT 1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![cutoff], RawRow::read)?;
        match rows.next() {
            Some(row) => Ok(Some(row?.into_event(self.tz)?)),
            None => Ok(None),
        }
    }

    /// Set the status of one row. Returns `false` when no row matched.
    pub fn mark_status(&self, event_id: &str, status: EventStatus) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE events SET status = ?1 WHERE event_id = ?2",
            params![status.as_str(), event_id],
        )?;
        Ok(changed > 0)
    }

    /// Set the system-managed flag of one row. Returns `false` when no row matched.
    pub fn mark_system_managed(&self, event_id: &str, managed: bool) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE events SET is_system_managed = ?1 WHERE event_id = ?2",
            params![managed, event_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get(&self, event_id: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.lock()?;
        query_event(&conn, self.tz, event_id)
    }

    /// Every row, ordered by start time.
    pub fn list(&self) -> Result<Vec<Event>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_EVENTS} ORDER BY date, start_time, event_id");
        self.collect(&conn, &sql, [])
    }

    /// Insert or refresh a calendar event, keeping its lifecycle status.
    ///
    /// New rows take `event.status`. Existing rows keep theirs, except that a
    /// `canceled` row which reappears in the calendar becomes `active` again.
    /// Returns the row as it was before the write.
    pub fn upsert_external(&self, event: &Event) -> Result<Option<Event>, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let previous = query_event(&tx, self.tz, &event.event_id)?;
        let cols = UtcColumns::from_event(event, self.tz);
        tx.execute(
            "INSERT INTO events \
             (event_id, date, start_time, end_time, title, is_system_managed, status, source, \
              original_event_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, 'external', NULL) \
             ON CONFLICT(event_id) DO UPDATE SET \
                date = excluded.date, \
                start_time = excluded.start_time, \
                end_time = excluded.end_time, \
                title = excluded.title, \
                status = CASE events.status WHEN 'canceled' THEN 'active' ELSE events.status END",
            params![
                event.event_id,
                cols.date,
                cols.start_time,
                cols.end_time,
                event.title,
                event.status.as_str(),
            ],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    /// Insert (or overwrite) an engine-created row.
    pub fn insert_system_event(&self, event: &Event) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let cols = UtcColumns::from_event(event, self.tz);
        conn.execute(
            INSERT_OR_REPLACE,
            params![
                event.event_id,
                cols.date,
                cols.start_time,
                cols.end_time,
                event.title,
                true,
                event.status.as_str(),
                EventSource::System.as_str(),
                event.original_event_id,
            ],
        )?;
        Ok(())
    }

    /// Pending rows whose start is older than `now - grace`.
    pub fn find_missed(
        &self,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Result<Vec<Event>, StoreError> {
        let cutoff = stamp(now - grace);
        let conn = self.lock()?;
        let sql = format!(
            "{SELECT_EVENTS} WHERE (date || ' ' || start_time) < ?1 AND {PENDING} \
             ORDER BY date, start_time"
        );
        self.collect(&conn, &sql, params![cutoff])
    }

    /// Alarm instants of every `active` calendar row, keyed by event id.
    pub fn active_external_times(&self) -> Result<HashMap<String, DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let sql = format!("{SELECT_EVENTS} WHERE source = 'external' AND status = 'active'");
        let events = self.collect(&conn, &sql, [])?;
        Ok(events
            .into_iter()
            .map(|ev| {
                let at = ev.trigger_time(self.tz);
                (ev.event_id, at)
            })
            .collect())
    }

    /// Whether a system-managed `snoozed` derivative points at `event_id`.
    pub fn has_snoozed_derivative(&self, event_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events \
             WHERE original_event_id = ?1 AND source = 'system' AND status = 'snoozed'",
            params![event_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Move a row to start at `start`, keeping its duration.
    /// Returns `false` when no row matched.
    pub fn update_times(&self, event_id: &str, start: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let Some(mut event) = query_event(&tx, self.tz, event_id)? else {
            return Ok(false);
        };
        let length = event.end_naive() - event.start_naive();
        let local = to_local(self.tz, start);
        event.date = local.date();
        event.start_time = local.time();
        event.end_time = (local + length).time();

        let cols = UtcColumns::from_event(&event, self.tz);
        tx.execute(
            "UPDATE events SET date = ?1, start_time = ?2, end_time = ?3 WHERE event_id = ?4",
            params![cols.date, cols.start_time, cols.end_time, event_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete `triggered` and `canceled` rows whose alarm time is more than
    /// `retention_days` before `now`. Returns the number of rows removed.
    pub fn purge_history(
        &self,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let cutoff = stamp(now - TimeDelta::days(i64::from(retention_days)));
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM events WHERE status IN ('triggered', 'canceled') \
             AND (date || ' ' || start_time) < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    fn collect<P: rusqlite::Params>(
        &self,
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<Event>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::read)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event(self.tz)?);
        }
        Ok(events)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Lock(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Row conversion helpers
// ---------------------------------------------------------------------------

fn stamp(at: DateTime<Utc>) -> String {
    at.format(STAMP_FORMAT).to_string()
}

fn query_event(conn: &Connection, tz: Tz, event_id: &str) -> Result<Option<Event>, StoreError> {
    let sql = format!("{SELECT_EVENTS} WHERE event_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params![event_id], RawRow::read)?;
    match rows.next() {
        Some(row) => Ok(Some(row?.into_event(tz)?)),
        None => Ok(None),
    }
}

/// UTC column values for one event.
struct UtcColumns {
    date: String,
    start_time: String,
    end_time: String,
}

impl UtcColumns {
    fn from_event(event: &Event, tz: Tz) -> Self {
        let start = resolve_local(tz, event.start_naive());
        let end = resolve_local(tz, event.end_naive());
        Self {
            date: start.format(DATE_FORMAT).to_string(),
            start_time: start.format(TIME_FORMAT).to_string(),
            end_time: end.format(TIME_FORMAT).to_string(),
        }
    }
}

/// A row exactly as stored, before timezone conversion.
struct RawRow {
    event_id: String,
    date: String,
    start_time: String,
    end_time: String,
    title: String,
    is_system_managed: bool,
    status: String,
    source: String,
    original_event_id: Option<String>,
}

impl RawRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            date: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            title: row.get(4)?,
            is_system_managed: row.get(5)?,
            status: row.get(6)?,
            source: row.get(7)?,
            original_event_id: row.get(8)?,
        })
    }

    fn into_event(self, tz: Tz) -> Result<Event, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            event_id: self.event_id.clone(),
            reason,
        };
        let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
            .map_err(|e| corrupt(format!("date `{}`: {e}", self.date)))?;
        let start = NaiveTime::parse_from_str(&self.start_time, TIME_FORMAT)
            .map_err(|e| corrupt(format!("start_time `{}`: {e}", self.start_time)))?;
        let end = NaiveTime::parse_from_str(&self.end_time, TIME_FORMAT)
            .map_err(|e| corrupt(format!("end_time `{}`: {e}", self.end_time)))?;
        let status = EventStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("status `{}`", self.status)))?;
        let source = EventSource::parse(&self.source)
            .ok_or_else(|| corrupt(format!("source `{}`", self.source)))?;

        let start_utc: NaiveDateTime = date.and_time(start);
        let mut end_utc = date.and_time(end);
        if end < start {
            end_utc += TimeDelta::days(1);
        }
        let local_start = to_local(tz, Utc.from_utc_datetime(&start_utc));
        let local_end = to_local(tz, Utc.from_utc_datetime(&end_utc));

        Ok(Event {
            event_id: self.event_id,
            date: local_start.date(),
            start_time: local_start.time(),
            end_time: local_end.time(),
            title: self.title,
            is_system_managed: self.is_system_managed,
            status,
            source,
            original_event_id: self.original_event_id,
        })
    }
}
