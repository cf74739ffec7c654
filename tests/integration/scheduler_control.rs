//! In-process scheduler driving real action dispatch.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;
use ulticlock::scheduler::{ActionDispatch, AlarmScheduler, SchedulerControl};

use crate::helpers::{fired, recording_registry, wait_until};

async fn running_scheduler(
    names: &[&str],
) -> (
    AlarmScheduler,
    Arc<std::sync::Mutex<Vec<crate::helpers::Fired>>>,
    CancellationToken,
) {
    let (registry, log) = recording_registry(names).await;
    let scheduler = AlarmScheduler::new(Arc::new(ActionDispatch::new(registry)))
        .with_tick_interval(Duration::from_millis(20));
    let token = CancellationToken::new();
    let _dispatch_loop = scheduler.run(token.clone());
    (scheduler, log, token)
}

#[tokio::test]
async fn due_task_fires_every_action_once() {
    let (scheduler, log, token) = running_scheduler(&["sound", "toast"]).await;

    assert!(
        scheduler
            .create("wake", Utc::now(), "Wake up", None)
            .await
    );
    assert!(wait_until(Duration::from_secs(3), || fired(&log).len() == 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut names: Vec<String> = fired(&log).into_iter().map(|(n, _, _)| n).collect();
    names.sort();
    assert_eq!(names, vec!["sound", "toast"]);
    assert!(fired(&log).iter().all(|(_, id, msg)| id == "wake" && msg == "Wake up"));
    assert!(!scheduler.status("wake").await.active);
    token.cancel();
}

#[tokio::test]
async fn plugin_list_restricts_actions() {
    let (scheduler, log, token) = running_scheduler(&["sound", "toast", "lights"]).await;

    scheduler
        .create("quiet", Utc::now(), "Shh", Some(vec!["toast".to_owned()]))
        .await;
    assert!(wait_until(Duration::from_secs(3), || !fired(&log).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let names: Vec<String> = fired(&log).into_iter().map(|(n, _, _)| n).collect();
    assert_eq!(names, vec!["toast"]);
    token.cancel();
}

#[tokio::test]
async fn replaced_task_fires_with_latest_payload_only() {
    let (scheduler, log, token) = running_scheduler(&["sound"]).await;

    let later = Utc::now() + TimeDelta::hours(1);
    scheduler.create("dup", later, "first", None).await;
    scheduler.create("dup", Utc::now(), "second", None).await;

    assert!(wait_until(Duration::from_secs(3), || !fired(&log).is_empty()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        fired(&log),
        vec![("sound".to_owned(), "dup".to_owned(), "second".to_owned())]
    );
    assert_eq!(scheduler.pending_count(), 0);
    token.cancel();
}

#[tokio::test]
async fn canceled_and_snoozed_tasks_do_not_fire_early() {
    let (scheduler, log, token) = running_scheduler(&["sound"]).await;
    let soon = Utc::now() + TimeDelta::milliseconds(150);

    scheduler.create("gone", soon, "gone", None).await;
    scheduler.create("later", soon, "later", None).await;
    assert!(scheduler.cancel("gone").await);
    assert!(scheduler.cancel("gone").await);
    assert!(scheduler.snooze("later", Duration::from_secs(540)).await);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(fired(&log).is_empty());

    let status = scheduler.status("later").await;
    assert!(status.active);
    let next = status.next_trigger.expect("pending");
    assert!(next > Utc::now() + TimeDelta::seconds(500));
    token.cancel();
}
