//! SQLite DDL for the event store.

use rusqlite::Connection;

/// Bumped whenever the table layout changes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the event database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
pub(crate) const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- date/start_time/end_time are UTC.
CREATE TABLE IF NOT EXISTS events (
    event_id          TEXT PRIMARY KEY,
    date              TEXT NOT NULL,      -- YYYY-MM-DD
    start_time        TEXT NOT NULL,      -- HH:MM:SS
    end_time          TEXT NOT NULL,      -- HH:MM:SS
    title             TEXT NOT NULL DEFAULT '',
    is_system_managed INTEGER NOT NULL DEFAULT 0,
    status            TEXT NOT NULL DEFAULT 'active',
    source            TEXT NOT NULL DEFAULT 'external',
    original_event_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_events_start    ON events(date, start_time);
CREATE INDEX IF NOT EXISTS idx_events_status   ON events(status);
CREATE INDEX IF NOT EXISTS idx_events_original ON events(original_event_id);
"#;

/// Apply the full schema to an open connection and seed the version stamp.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read the stored schema version, `None` on a database that was never stamped.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let value: String = row.get(0)?;
            Ok(value.parse().ok())
        }
        None => Ok(None),
    }
}
