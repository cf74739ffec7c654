//! HTTP client for a remote scheduler's control surface.
//!
//! Implements [`SchedulerControl`] so the reconciliation engine can drive a
//! scheduler in another process exactly like an in-process one. Transport
//! errors and non-2xx answers collapse to `false` (or an inactive status);
//! the cause is logged.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AlarmError, Result};
use crate::scheduler::control::{AlarmStatus, SchedulerControl};
use crate::scheduler::server::{
    CancelRequest, ControlResponse, CreateRequest, ModifyRequest, SnoozeRequest,
};
use crate::time_spec::format_time_spec;

/// Request timeout for control calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to a scheduler control surface over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSchedulerClient {
    base_url: String,
    tz: Tz,
    client: reqwest::Client,
}

impl HttpSchedulerClient {
    /// `base_url` is the scheduler root, e.g. `http://localhost:8080`.
    /// Times are sent as `time_spec` strings in `tz`, which must match the
    /// scheduler's own timezone.
    pub fn new(base_url: &str, tz: Tz) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(AlarmError::Http)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            tz,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `<base_url>/status/<alarm_id>`, with the id as one encoded segment.
    fn status_url(&self, alarm_id: &str) -> Option<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url).ok()?;
        url.path_segments_mut()
            .ok()?
            .pop_if_empty()
            .push("status")
            .push(alarm_id);
        Some(url)
    }

    async fn post<T: Serialize + Sync>(&self, endpoint: &str, body: &T) -> bool {
        let url = format!("{}/{endpoint}", self.base_url);
        let resp = match self.client.post(&url).json(body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(%url, error = %e, "scheduler request failed");
                return false;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            debug!(%url, %status, "scheduler rejected request");
            return false;
        }
        match resp.json::<ControlResponse>().await {
            Ok(answer) => answer.success,
            Err(e) => {
                warn!(%url, error = %e, "unreadable scheduler response");
                false
            }
        }
    }
}

#[async_trait]
impl SchedulerControl for HttpSchedulerClient {
    async fn create(
        &self,
        alarm_id: &str,
        trigger_time: DateTime<Utc>,
        command: &str,
        plugin_list: Option<Vec<String>>,
    ) -> bool {
        let body = CreateRequest {
            alarm_id: alarm_id.to_owned(),
            time_spec: format_time_spec(trigger_time, self.tz),
            command: command.to_owned(),
            plugin_list,
        };
        self.post("create", &body).await
    }

    async fn modify(&self, alarm_id: &str, new_trigger_time: DateTime<Utc>) -> bool {
        let body = ModifyRequest {
            alarm_id: alarm_id.to_owned(),
            new_time_spec: format_time_spec(new_trigger_time, self.tz),
        };
        self.post("modify", &body).await
    }

    async fn cancel(&self, alarm_id: &str) -> bool {
        let body = CancelRequest {
            alarm_id: alarm_id.to_owned(),
        };
        self.post("cancel", &body).await
    }

    async fn snooze(&self, alarm_id: &str, delay: Duration) -> bool {
        let body = SnoozeRequest {
            alarm_id: alarm_id.to_owned(),
            snooze_seconds: Some(delay.as_secs()),
        };
        self.post("snooze", &body).await
    }

    async fn status(&self, alarm_id: &str) -> AlarmStatus {
        let Some(url) = self.status_url(alarm_id) else {
            warn!(base_url = %self.base_url, alarm_id, "cannot build status url");
            return AlarmStatus::inactive();
        };
        let resp = match self.client.get(url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                debug!(%url, status = %resp.status(), "status query rejected");
                return AlarmStatus::inactive();
            }
            Err(e) => {
                warn!(%url, error = %e, "status query failed");
                return AlarmStatus::inactive();
            }
        };
        resp.json::<AlarmStatus>().await.unwrap_or_else(|e| {
            warn!(%url, error = %e, "unreadable status response");
            AlarmStatus::inactive()
        })
    }
}
