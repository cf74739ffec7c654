//! Shared helpers for integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use ulticlock::CalendarEvent;
use ulticlock::actions::{ActionContext, ActionError, ActionRegistry, AlarmAction};

/// One recorded action invocation: `(action, alarm_id, message)`.
pub(crate) type Fired = (String, String, String);

/// Action that records every execution into a shared log.
pub(crate) struct RecordingAction {
    name: String,
    log: Arc<Mutex<Vec<Fired>>>,
}

#[async_trait]
impl AlarmAction for RecordingAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, alarm_id: &str, ctx: &ActionContext) -> Result<(), ActionError> {
        self.log.lock().expect("log lock").push((
            self.name.clone(),
            alarm_id.to_owned(),
            ctx.message.clone(),
        ));
        Ok(())
    }
}

/// Registry of recording actions named `names`, plus the shared log.
pub(crate) async fn recording_registry(
    names: &[&str],
) -> (Arc<ActionRegistry>, Arc<Mutex<Vec<Fired>>>) {
    recording_registry_with(names, Vec::new()).await
}

/// Like [`recording_registry`], with `extra` actions registered too.
pub(crate) async fn recording_registry_with(
    names: &[&str],
    extra: Vec<Box<dyn AlarmAction>>,
) -> (Arc<ActionRegistry>, Arc<Mutex<Vec<Fired>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ActionRegistry::new().with_action_timeout(Duration::from_secs(5));
    for name in names {
        registry
            .register(Box::new(RecordingAction {
                name: (*name).to_owned(),
                log: Arc::clone(&log),
            }))
            .await;
    }
    for action in extra {
        registry.register(action).await;
    }
    (Arc::new(registry), log)
}

/// Snapshot of the log.
pub(crate) fn fired(log: &Arc<Mutex<Vec<Fired>>>) -> Vec<Fired> {
    log.lock().expect("log lock").clone()
}

/// Poll `check` until it holds or `within` elapses.
pub(crate) async fn wait_until(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

pub(crate) fn utc_tz() -> Tz {
    "UTC".parse().expect("tz")
}

/// `now + offset_minutes`, truncated to the minute, as a naive UTC time.
pub(crate) fn minute(now: DateTime<Utc>, offset_minutes: i64) -> NaiveDateTime {
    (now + TimeDelta::minutes(offset_minutes))
        .naive_utc()
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("truncate")
}

/// Calendar event `id` starting at `start`, lasting 30 minutes.
pub(crate) fn cal(id: &str, start: NaiveDateTime) -> CalendarEvent {
    CalendarEvent::new(
        id,
        start.date(),
        start.time(),
        (start + TimeDelta::minutes(30)).time(),
        format!("Alarm {id}"),
    )
}
