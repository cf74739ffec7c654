//! The axum control surface on an ephemeral port, driven over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};
use ulticlock::calendar::StaticCalendar;
use ulticlock::config::SyncConfig;
use ulticlock::scheduler::{
    AlarmExecutor, AlarmScheduler, AlarmTask, ControlServer, HttpSchedulerClient,
    SchedulerControl,
};
use ulticlock::store::EventStore;
use ulticlock::sync::Reconciler;

use crate::helpers::{cal, minute, utc_tz};

struct Idle;

#[async_trait]
impl AlarmExecutor for Idle {
    async fn execute(&self, _task: AlarmTask) {}
}

async fn serve(tz: Tz) -> (AlarmScheduler, ControlServer) {
    let scheduler = AlarmScheduler::new(Arc::new(Idle));
    let server = ControlServer::start(
        Arc::new(scheduler.clone()),
        tz,
        Duration::from_secs(540),
        "127.0.0.1",
        0,
    )
    .await
    .expect("start control surface");
    (scheduler, server)
}

async fn post(server: &ControlServer, endpoint: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/{endpoint}", server.base_url()))
        .json(&body)
        .send()
        .await
        .expect("request");
    let status = resp.status().as_u16();
    (status, resp.json().await.expect("json body"))
}

async fn status(server: &ControlServer, alarm_id: &str) -> Value {
    reqwest::get(format!("{}/status/{alarm_id}", server.base_url()))
        .await
        .expect("request")
        .json()
        .await
        .expect("json body")
}

#[tokio::test]
async fn create_interprets_time_spec_in_scheduler_zone() {
    let (_scheduler, server) = serve("America/Phoenix".parse().expect("tz")).await;

    let (code, body) = post(
        &server,
        "create",
        json!({
            "alarm_id": "standup",
            "time_spec": "2030-01-07 09:00:00",
            "command": "Standup",
            "plugin_list": ["toast"]
        }),
    )
    .await;
    assert_eq!(code, 200);
    assert_eq!(body, json!({ "success": true }));

    assert_eq!(
        status(&server, "standup").await,
        json!({ "active": true, "next_trigger": "2030-01-07T16:00:00Z" })
    );
}

#[tokio::test]
async fn cancel_is_idempotent_over_http() {
    let (_scheduler, server) = serve(utc_tz()).await;
    post(
        &server,
        "create",
        json!({ "alarm_id": "x", "time_spec": "2030-01-01 07:00:00" }),
    )
    .await;

    for _ in 0..2 {
        let (code, body) = post(&server, "cancel", json!({ "alarm_id": "x" })).await;
        assert_eq!(code, 200);
        assert_eq!(body["success"], true);
    }
    assert_eq!(
        status(&server, "x").await,
        json!({ "active": false, "next_trigger": null })
    );
}

#[tokio::test]
async fn bad_requests_get_400_and_change_nothing() {
    let (scheduler, server) = serve(utc_tz()).await;

    let (code, body) = post(
        &server,
        "modify",
        json!({ "alarm_id": "ghost", "new_time_spec": "2030-01-01 07:00:00" }),
    )
    .await;
    assert_eq!((code, body["success"].clone()), (400, json!(false)));

    let (code, _) = post(
        &server,
        "create",
        json!({ "alarm_id": "bad", "time_spec": "tomorrow at seven" }),
    )
    .await;
    assert_eq!(code, 400);

    let (code, _) = post(&server, "create", json!({ "time_spec": "2030-01-01 07:00:00" })).await;
    assert_eq!(code, 400);

    let (code, _) = post(&server, "snooze", json!({ "alarm_id": "ghost" })).await;
    assert_eq!(code, 400);

    assert_eq!(scheduler.pending_count(), 0);
}

#[tokio::test]
async fn snooze_without_seconds_uses_default_delay() {
    let (scheduler, server) = serve(utc_tz()).await;
    scheduler
        .create("wake", Utc::now() + TimeDelta::minutes(1), "Wake", None)
        .await;

    let before = Utc::now();
    let (code, _) = post(&server, "snooze", json!({ "alarm_id": "wake" })).await;
    assert_eq!(code, 200);

    let next = scheduler
        .status("wake")
        .await
        .next_trigger
        .expect("still pending");
    assert!(next >= before + TimeDelta::seconds(540));
    assert!(next <= Utc::now() + TimeDelta::seconds(540));
}

#[tokio::test]
async fn http_client_round_trips_against_real_server() {
    let tz: Tz = "America/Denver".parse().expect("tz");
    let (scheduler, server) = serve(tz).await;
    let client = HttpSchedulerClient::new(&server.base_url(), tz).expect("client");

    let at = (Utc::now() + TimeDelta::hours(2))
        .with_timezone(&tz)
        .date_naive()
        .and_hms_opt(12, 0, 0)
        .expect("noon")
        .and_local_timezone(tz)
        .single()
        .expect("unambiguous noon")
        .with_timezone(&Utc);

    assert!(client.create("lunch", at, "Lunch", None).await);
    assert_eq!(client.status("lunch").await.next_trigger, Some(at));
    assert!(client.modify("lunch", at + TimeDelta::minutes(30)).await);
    assert_eq!(
        scheduler.status("lunch").await.next_trigger,
        Some(at + TimeDelta::minutes(30))
    );
    assert!(client.cancel("lunch").await);
    assert!(!client.status("lunch").await.active);
    assert!(!client.modify("lunch", at).await);
}

#[tokio::test]
async fn http_client_status_survives_reserved_characters_in_ids() {
    let (scheduler, server) = serve(utc_tz()).await;
    let client = HttpSchedulerClient::new(&server.base_url(), utc_tz()).expect("client");
    let at = minute(Utc::now(), 90).and_utc();
    let id = "team/standup#weekly?x:06-03";

    assert!(client.create(id, at, "Standup", None).await);
    assert!(scheduler.status(id).await.active);
    assert_eq!(client.status(id).await.next_trigger, Some(at));
    assert!(!client.status("team").await.active);
}

#[tokio::test]
async fn reconciler_drives_a_remote_scheduler() {
    let (scheduler, server) = serve(utc_tz()).await;
    let store = Arc::new(EventStore::open_in_memory(utc_tz()).expect("store"));
    let calendar = StaticCalendar::default();
    let now = Utc::now();
    calendar.set_events(vec![cal("remote", minute(now, 45))]);

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::new(HttpSchedulerClient::new(&server.base_url(), utc_tz()).expect("client")),
        Arc::new(calendar.clone()),
        SyncConfig::default(),
    );
    let report = reconciler.run_cycle(now).await.expect("cycle");
    assert_eq!(report.created, 1);
    assert_eq!(
        scheduler.status("remote").await.next_trigger,
        Some(minute(now, 45).and_utc())
    );

    calendar.set_events(Vec::new());
    let report = reconciler.run_cycle(Utc::now()).await.expect("cycle");
    assert_eq!(report.canceled, 1);
    assert!(!scheduler.status("remote").await.active);
}
