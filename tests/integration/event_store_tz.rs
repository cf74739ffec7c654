//! Event store persistence and timezone handling on a real database file.

use chrono::{NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tempfile::TempDir;
use ulticlock::store::{Event, EventStatus, EventStore};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("time")
}

#[test]
fn wall_clock_survives_utc_round_trip_across_reopen() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("data").join("events.db");
    let phoenix: Tz = "America/Phoenix".parse().expect("tz");

    {
        let store = EventStore::open(&path, phoenix).expect("open");
        store
            .replace_all(&[Event::external(
                "standup",
                date(2024, 3, 10),
                time(9, 0),
                time(9, 15),
                "Standup",
            )])
            .expect("replace");
    }

    let store = EventStore::open(&path, phoenix).expect("reopen");
    let row = store.get("standup").expect("get").expect("row");
    assert_eq!(row.date, date(2024, 3, 10));
    assert_eq!(row.start_time, time(9, 0));
    assert_eq!(row.end_time, time(9, 15));
    assert_eq!(
        row.trigger_time(phoenix),
        Utc.with_ymd_and_hms(2024, 3, 10, 16, 0, 0).unwrap()
    );
}

#[test]
fn same_rows_read_back_in_another_zone() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("events.db");
    let denver: Tz = "America/Denver".parse().expect("tz");
    let berlin: Tz = "Europe/Berlin".parse().expect("tz");

    EventStore::open(&path, denver)
        .expect("open")
        .replace_all(&[Event::external(
            "late",
            date(2024, 6, 1),
            time(20, 0),
            time(21, 0),
            "Late call",
        )])
        .expect("replace");

    let row = EventStore::open(&path, berlin)
        .expect("reopen")
        .get("late")
        .expect("get")
        .expect("row");
    // 20:00 MDT is 04:00 CEST the next day.
    assert_eq!(row.date, date(2024, 6, 2));
    assert_eq!(row.start_time, time(4, 0));
}

#[test]
fn next_due_follows_status_transitions() {
    let tz: Tz = "UTC".parse().expect("tz");
    let store = EventStore::open_in_memory(tz).expect("store");
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
    let d = date(2024, 6, 1);
    store
        .replace_all(&[
            Event::external("a", d, time(7, 0), time(7, 30), "A"),
            Event::external("b", d, time(8, 0), time(8, 30), "B"),
        ])
        .expect("replace");

    assert_eq!(
        store.next_due(now, TimeDelta::minutes(1)).expect("query").map(|e| e.event_id),
        Some("a".to_owned())
    );
    assert!(store.mark_status("a", EventStatus::Triggered).expect("mark"));
    assert_eq!(
        store.next_due(now, TimeDelta::minutes(1)).expect("query").map(|e| e.event_id),
        Some("b".to_owned())
    );
    assert!(!store.mark_status("zzz", EventStatus::Canceled).expect("mark"));
}
