//! HTTP control surface for the alarm scheduler.
//!
//! ## Endpoints
//!
//! - `POST /create` `{alarm_id, time_spec, command, plugin_list?}`
//! - `POST /modify` `{alarm_id, new_time_spec}`
//! - `POST /cancel` `{alarm_id}`
//! - `POST /snooze` `{alarm_id, snooze_seconds?}`
//! - `GET /status/{alarm_id}` → `{active, next_trigger}`
//!
//! Mutating calls answer `{"success": bool}` with 200 on success and 400 on
//! failure, including malformed bodies and unparseable `time_spec`s.
//! `time_spec` is `"YYYY-MM-DD HH:MM:SS"` in the scheduler's timezone.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{AlarmError, Result};
use crate::scheduler::control::{AlarmStatus, SchedulerControl};
use crate::time_spec::parse_time_spec;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Body of `POST /create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequest {
    pub alarm_id: String,
    pub time_spec: String,
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_list: Option<Vec<String>>,
}

/// Body of `POST /modify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyRequest {
    pub alarm_id: String,
    pub new_time_spec: String,
}

/// Body of `POST /cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub alarm_id: String,
}

/// Body of `POST /snooze`. Missing `snooze_seconds` uses the configured default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnoozeRequest {
    pub alarm_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snooze_seconds: Option<u64>,
}

/// Answer to every mutating call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ControlState {
    control: Arc<dyn SchedulerControl>,
    tz: Tz,
    default_snooze: Duration,
}

type Reply = (StatusCode, Json<ControlResponse>);

/// Running control-surface listener.
pub struct ControlServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ControlServer {
    /// Bind `{host}:{port}` (port `0` auto-assigns) and start serving.
    pub async fn start(
        control: Arc<dyn SchedulerControl>,
        tz: Tz,
        default_snooze: Duration,
        host: &str,
        port: u16,
    ) -> Result<Self> {
        let app = router(ControlState {
            control,
            tz,
            default_snooze,
        });

        let bind_addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            AlarmError::Scheduler(format!("control surface bind {bind_addr} failed: {e}"))
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| AlarmError::Scheduler(format!("failed to get local addr: {e}")))?;

        info!("scheduler control surface listening on http://{addr}");

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("control surface error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Base URL clients should use, e.g. `http://127.0.0.1:8080`.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Abort the server task.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn router(state: ControlState) -> Router {
    Router::new()
        .route("/create", post(handle_create))
        .route("/modify", post(handle_modify))
        .route("/cancel", post(handle_cancel))
        .route("/snooze", post(handle_snooze))
        .route("/status/{alarm_id}", get(handle_status))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn reply(success: bool) -> Reply {
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(ControlResponse { success }))
}

fn rejected(endpoint: &str, reason: impl std::fmt::Display) -> Reply {
    warn!(endpoint, %reason, "control request rejected");
    reply(false)
}

fn check_id(endpoint: &str, alarm_id: &str) -> std::result::Result<(), Reply> {
    if alarm_id.trim().is_empty() {
        Err(rejected(endpoint, "empty alarm_id"))
    } else {
        Ok(())
    }
}

async fn handle_create(
    State(state): State<ControlState>,
    body: std::result::Result<Json<CreateRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => return rejected("create", e.body_text()),
    };
    if let Err(r) = check_id("create", &req.alarm_id) {
        return r;
    }
    let at = match parse_time_spec(&req.time_spec, state.tz) {
        Ok(at) => at,
        Err(e) => return rejected("create", e),
    };
    reply(
        state
            .control
            .create(&req.alarm_id, at, &req.command, req.plugin_list)
            .await,
    )
}

async fn handle_modify(
    State(state): State<ControlState>,
    body: std::result::Result<Json<ModifyRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => return rejected("modify", e.body_text()),
    };
    if let Err(r) = check_id("modify", &req.alarm_id) {
        return r;
    }
    let at = match parse_time_spec(&req.new_time_spec, state.tz) {
        Ok(at) => at,
        Err(e) => return rejected("modify", e),
    };
    reply(state.control.modify(&req.alarm_id, at).await)
}

async fn handle_cancel(
    State(state): State<ControlState>,
    body: std::result::Result<Json<CancelRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => return rejected("cancel", e.body_text()),
    };
    if let Err(r) = check_id("cancel", &req.alarm_id) {
        return r;
    }
    reply(state.control.cancel(&req.alarm_id).await)
}

async fn handle_snooze(
    State(state): State<ControlState>,
    body: std::result::Result<Json<SnoozeRequest>, JsonRejection>,
) -> Reply {
    let Json(req) = match body {
        Ok(b) => b,
        Err(e) => return rejected("snooze", e.body_text()),
    };
    if let Err(r) = check_id("snooze", &req.alarm_id) {
        return r;
    }
    let delay = req
        .snooze_seconds
        .map(Duration::from_secs)
        .unwrap_or(state.default_snooze);
    reply(state.control.snooze(&req.alarm_id, delay).await)
}

async fn handle_status(
    State(state): State<ControlState>,
    Path(alarm_id): Path<String>,
) -> Json<AlarmStatus> {
    Json(state.control.status(&alarm_id).await)
}
