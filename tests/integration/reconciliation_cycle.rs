//! Calendar → store → scheduler → actions, end to end.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use ulticlock::actions::{ActionContext, ActionError, AlarmAction};
use ulticlock::calendar::StaticCalendar;
use ulticlock::config::SyncConfig;
use ulticlock::scheduler::{ActionDispatch, AlarmScheduler, SchedulerControl};
use ulticlock::store::{Event, EventStatus, EventStore};
use ulticlock::sync::Reconciler;

use crate::helpers::{
    Fired, cal, fired, minute, recording_registry, recording_registry_with, utc_tz, wait_until,
};

struct Stack {
    _tmp: TempDir,
    store: Arc<EventStore>,
    scheduler: AlarmScheduler,
    calendar: StaticCalendar,
    reconciler: Reconciler,
    log: Arc<Mutex<Vec<Fired>>>,
    token: CancellationToken,
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn stack() -> Stack {
    let tmp = TempDir::new().expect("tempdir");
    let store = Arc::new(EventStore::open(&tmp.path().join("events.db"), utc_tz()).expect("store"));
    let (registry, log) = recording_registry(&["sound", "lights", "toast"]).await;
    let dispatch = ActionDispatch::new(registry).with_store(Arc::clone(&store));
    let scheduler =
        AlarmScheduler::new(Arc::new(dispatch)).with_tick_interval(Duration::from_millis(20));
    let token = CancellationToken::new();
    let _dispatch_loop = scheduler.run(token.clone());

    let calendar = StaticCalendar::default();
    let config = SyncConfig {
        default_actions: vec!["toast".to_owned()],
        emergency_actions: vec!["sound".to_owned(), "lights".to_owned()],
        ..SyncConfig::default()
    };
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::new(scheduler.clone()),
        Arc::new(calendar.clone()),
        config,
    );
    Stack {
        _tmp: tmp,
        store,
        scheduler,
        calendar,
        reconciler,
        log,
        token,
    }
}

fn status_of(store: &EventStore, id: &str) -> EventStatus {
    store.get(id).expect("get").expect("row").status
}

#[tokio::test]
async fn due_calendar_event_fires_once_and_is_marked_triggered() {
    let s = stack().await;
    let now = Utc::now();
    s.calendar.set_events(vec![cal("wake", minute(now, 0))]);

    let report = s.reconciler.run_cycle(now).await.expect("cycle");
    assert_eq!(report.created, 1);
    assert!(wait_until(Duration::from_secs(3), || !fired(&s.log).is_empty()).await);
    assert_eq!(status_of(&s.store, "wake"), EventStatus::Triggered);

    // The calendar still lists it; a later cycle must not fire it again.
    let report = s.reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.created, 0);
    assert_eq!(report.escalated, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        fired(&s.log),
        vec![(
            "toast".to_owned(),
            "wake".to_owned(),
            "Alarm wake".to_owned()
        )]
    );
}

#[tokio::test]
async fn downtime_miss_escalates_to_emergency_actions_once() {
    let s = stack().await;
    let now = Utc::now();
    let overslept = cal("overslept", minute(now, -10));
    // Stored by a previous run that went down before the alarm time.
    s.store
        .upsert_external(&Event::from(&overslept))
        .expect("seed");
    s.calendar.set_events(vec![overslept]);

    let report = s.reconciler.run_cycle(now).await.expect("cycle");
    assert_eq!(report.escalated, 1);
    assert!(wait_until(Duration::from_secs(3), || fired(&s.log).len() == 2).await);

    let mut names: Vec<String> = fired(&s.log)
        .into_iter()
        .map(|(name, id, msg)| {
            assert_eq!(id, "overslept_emergency");
            assert!(msg.contains("Alarm overslept"));
            name
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["lights", "sound"]);
    assert_eq!(status_of(&s.store, "overslept"), EventStatus::Triggered);

    let again = s.reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(again.escalated, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fired(&s.log).len(), 2);
}

#[tokio::test]
async fn reconciler_snooze_survives_resync_without_duplicates() {
    let s = stack().await;
    let now = Utc::now();
    s.calendar.set_events(vec![cal("standup", minute(now, 30))]);
    s.reconciler.run_cycle(now).await.expect("cycle");

    assert!(
        s.reconciler
            .snooze_event("standup", Duration::from_secs(3600))
            .await
            .expect("snooze")
    );
    let derived = s.store.get("standup_snooze").expect("get").expect("row");
    assert_eq!(derived.original_event_id.as_deref(), Some("standup"));
    assert!(derived.is_system_managed);

    // Re-fetching the recurring instance must not bring back its own task.
    let report = s.reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.suppressed, 1);
    assert_eq!(status_of(&s.store, "standup"), EventStatus::Triggered);
    assert!(!s.scheduler.status("standup").await.active);
    assert!(s.scheduler.status("standup_snooze").await.active);
    assert_eq!(s.scheduler.pending_count(), 1);
}

#[tokio::test]
async fn snooze_derivative_fires_and_resolves_the_original() {
    let s = stack().await;
    let now = Utc::now();
    s.calendar.set_events(vec![cal("gym", minute(now, 30))]);
    s.reconciler.run_cycle(now).await.expect("cycle");

    s.reconciler
        .snooze_event("gym", Duration::from_millis(100))
        .await
        .expect("snooze");
    assert!(wait_until(Duration::from_secs(3), || !fired(&s.log).is_empty()).await);
    assert_eq!(fired(&s.log)[0].1, "gym_snooze");
    assert_eq!(status_of(&s.store, "gym_snooze"), EventStatus::Triggered);

    s.reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(status_of(&s.store, "gym"), EventStatus::Triggered);
    assert_eq!(s.scheduler.pending_count(), 0);
}

#[tokio::test]
async fn control_surface_snooze_is_a_plain_retime() {
    let s = stack().await;
    let now = Utc::now();
    let start = minute(now, 30);
    s.calendar.set_events(vec![cal("nap", start)]);
    s.reconciler.run_cycle(now).await.expect("cycle");

    assert!(s.scheduler.snooze("nap", Duration::from_secs(7200)).await);
    assert!(s.store.get("nap_snooze").expect("get").is_none());
    assert_eq!(status_of(&s.store, "nap"), EventStatus::Active);

    // Unchanged calendar data keeps the snoozed live time.
    let report = s.reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.created + report.modified, 0);
    let next = s.scheduler.status("nap").await.next_trigger.expect("pending");
    assert!(next > start.and_utc() + TimeDelta::minutes(60));
}

#[tokio::test]
async fn removed_event_loses_its_live_task() {
    let s = stack().await;
    let now = Utc::now();
    s.calendar.set_events(vec![cal("dentist", minute(now, 90))]);
    s.reconciler.run_cycle(now).await.expect("cycle");
    assert!(s.scheduler.status("dentist").await.active);

    s.calendar.set_events(Vec::new());
    let report = s.reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.canceled, 1);
    assert_eq!(status_of(&s.store, "dentist"), EventStatus::Canceled);
    assert!(!s.scheduler.status("dentist").await.active);
}

/// Holds the `blocker` alarm inside its execution until released.
struct GateAction {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl AlarmAction for GateAction {
    fn name(&self) -> &str {
        "gate"
    }

    async fn execute(&self, alarm_id: &str, _ctx: &ActionContext) -> Result<(), ActionError> {
        if alarm_id == "blocker" {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn alarm_waiting_for_a_dispatch_slot_is_not_rescheduled_or_escalated() {
    let tmp = TempDir::new().expect("tempdir");
    let store = Arc::new(EventStore::open(&tmp.path().join("events.db"), utc_tz()).expect("store"));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let gate = GateAction {
        started: Arc::clone(&started),
        release: Arc::clone(&release),
    };
    let (registry, log) = recording_registry_with(&["toast"], vec![Box::new(gate)]).await;
    let dispatch = ActionDispatch::new(registry).with_store(Arc::clone(&store));
    let scheduler = AlarmScheduler::new(Arc::new(dispatch)).with_max_concurrent_dispatches(1);

    let calendar = StaticCalendar::default();
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::new(scheduler.clone()),
        Arc::new(calendar.clone()),
        SyncConfig {
            default_actions: vec!["toast".to_owned()],
            ..SyncConfig::default()
        },
    );

    // `blocker` takes the only dispatch slot.
    let now = Utc::now();
    scheduler.create("blocker", now, "", None).await;
    assert_eq!(scheduler.dispatch_due(now), 1);
    tokio::time::timeout(Duration::from_secs(3), started.notified())
        .await
        .expect("blocker running");

    let start = minute(now, 1);
    calendar.set_events(vec![cal("wake", start)]);
    assert_eq!(reconciler.run_cycle(now).await.expect("cycle").created, 1);

    // `wake` is due and popped, but must wait for the slot.
    assert_eq!(scheduler.dispatch_due(now + TimeDelta::minutes(2)), 1);
    assert_eq!(scheduler.pending_count(), 0);
    assert!(scheduler.status("wake").await.active);
    assert_eq!(status_of(&store, "wake"), EventStatus::Triggered);

    let report = reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.created, 0);
    let report = reconciler
        .run_cycle(now + TimeDelta::hours(1))
        .await
        .expect("cycle");
    assert_eq!(report.created, 0);
    assert_eq!(report.escalated, 0);
    assert!(store.get("wake_emergency").expect("get").is_none());

    release.notify_one();
    assert!(wait_until(Duration::from_secs(3), || {
        fired(&log).iter().any(|(_, id, _)| id == "wake")
    })
    .await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let wake_runs = fired(&log).iter().filter(|(_, id, _)| id == "wake").count();
    assert_eq!(wake_runs, 1, "alarm dispatched more than once");
    assert!(!scheduler.status("wake").await.active);
}
