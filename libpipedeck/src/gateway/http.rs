//! The reqwest-backed [`Gateway`]. Speaks the pipeline server's JSON
//! protocol: `GET /status` for all pipelines, `GET /status/{id}` for one,
//! `POST /{id}` to start one (409 means the pipeline is already running).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use super::{Gateway, GatewayError, TriggerOutcome};
use crate::catalog::PipelineId;
use crate::log::*;
use crate::status::{PipelineState, PipelineStatus, StatusMap};

/// Requests that outlive this are treated the same as an unreachable server.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new<S: Into<String>>(base_url: S) -> Result<Self, GatewayError> {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    #[tracing::instrument(skip(self))]
    async fn fetch_all_statuses(&self) -> Result<StatusMap, GatewayError> {
        let response = self
            .client
            .get(self.url("status"))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let raw: HashMap<String, StatusEntry> = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(decode_statuses(raw))
    }

    #[tracing::instrument(skip(self))]
    async fn fetch_status(&self, id: &PipelineId) -> Result<PipelineStatus, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("status/{}", id)))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }
        let entry: StatusEntry = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let label = entry.status.clone();
        entry.into_status().ok_or_else(|| GatewayError::Server {
            status: StatusCode::OK.as_u16(),
            message: format!("malformed status '{}' for pipeline {}", label, id),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn start_pipeline(&self, id: &PipelineId) -> TriggerOutcome {
        let response = match self.client.post(self.url(id.as_str())).send().await {
            Ok(response) => response,
            Err(e) => return TriggerOutcome::Failed(e.to_string()),
        };
        match classify_start(response.status()) {
            StartDisposition::Started => TriggerOutcome::Started,
            StartDisposition::Conflict => TriggerOutcome::AlreadyRunning,
            StartDisposition::Failure => TriggerOutcome::Failed(read_message(response).await),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartDisposition {
    Started,
    Conflict,
    Failure,
}

/// The conflict signal must stay distinguishable from a generic failure so
/// the caller can treat it as information rather than an error.
fn classify_start(status: StatusCode) -> StartDisposition {
    if status.is_success() {
        StartDisposition::Started
    } else if status == StatusCode::CONFLICT {
        StartDisposition::Conflict
    } else {
        StartDisposition::Failure
    }
}

/// One pipeline's entry in a server status response.
#[derive(Debug, Deserialize)]
struct StatusEntry {
    status: String,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl StatusEntry {
    /// Returns `None` when the entry cannot satisfy the status record
    /// invariants (unknown state label, running without a start time, ...).
    fn into_status(self) -> Option<PipelineStatus> {
        let started_at = self.started_at.as_deref().and_then(parse_timestamp);
        let completed_at = self.completed_at.as_deref().and_then(parse_timestamp);
        match state_for_label(&self.status)? {
            PipelineState::Idle => Some(PipelineStatus::idle()),
            PipelineState::Running => started_at.map(PipelineStatus::running),
            PipelineState::Completed => match (started_at, completed_at) {
                (Some(started), Some(completed)) => {
                    Some(PipelineStatus::completed(started, completed))
                }
                _ => None,
            },
            PipelineState::Failed => match (started_at, completed_at) {
                (Some(started), Some(completed)) => Some(PipelineStatus::failed(
                    started,
                    completed,
                    self.error.unwrap_or_else(|| "pipeline failed".to_string()),
                )),
                _ => None,
            },
        }
    }
}

/// Older servers report failures as `"error"`; both map to `Failed`.
fn state_for_label(label: &str) -> Option<PipelineState> {
    match label {
        "idle" => Some(PipelineState::Idle),
        "running" => Some(PipelineState::Running),
        "completed" => Some(PipelineState::Completed),
        "failed" | "error" => Some(PipelineState::Failed),
        _ => None,
    }
}

fn decode_statuses(raw: HashMap<String, StatusEntry>) -> StatusMap {
    let mut statuses = StatusMap::new();
    for (id, entry) in raw {
        let label = entry.status.clone();
        match entry.into_status() {
            Some(status) => {
                statuses.insert(PipelineId::new(id), status);
            }
            None => warn!("skipping malformed status '{}' for pipeline {}", label, id),
        }
    }
    statuses
}

/// The server emits RFC 3339 when fronted by a proxy and zone-less ISO 8601
/// when talked to directly; the latter is taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    #[serde(default)]
    message: Option<String>,
}

async fn server_error(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let message = read_message(response).await;
    GatewayError::Server { status, message }
}

/// Pull the `message` field out of an error body, falling back to the status
/// line when the body is empty or not JSON.
async fn read_message(response: reqwest::Response) -> String {
    let status = response.status();
    let from_body = match response.text().await {
        Ok(body) => serde_json::from_str::<ServerMessage>(&body)
            .ok()
            .and_then(|parsed| parsed.message),
        Err(_) => None,
    };
    from_body.unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use reqwest::StatusCode;

    use super::*;

    fn entry(
        status: &str,
        started_at: Option<&str>,
        completed_at: Option<&str>,
        error: Option<&str>,
    ) -> StatusEntry {
        StatusEntry {
            status: status.to_string(),
            started_at: started_at.map(str::to_string),
            completed_at: completed_at.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn timestamps_parse_from_rfc3339_and_naive_iso() {
        let expected = Utc.with_ymd_and_hms(2026, 8, 4, 10, 30, 0).unwrap();
        assert_eq!(Some(expected), parse_timestamp("2026-08-04T10:30:00Z"));
        assert_eq!(
            Some(expected),
            parse_timestamp("2026-08-04T12:30:00+02:00")
        );
        assert_eq!(Some(expected), parse_timestamp("2026-08-04T10:30:00"));
        assert_eq!(
            Some(expected),
            parse_timestamp("2026-08-04T10:30:00.000000")
        );
        assert_eq!(None, parse_timestamp("four thirty"));
    }

    #[test]
    fn entries_decode_into_status_records() {
        let running = entry("running", Some("2026-08-04T10:30:00"), None, None)
            .into_status()
            .expect("running entry");
        assert!(running.is_running());
        assert!(running.started_at().is_some());

        let failed = entry(
            "failed",
            Some("2026-08-04T10:30:00"),
            Some("2026-08-04T10:31:00"),
            Some("exploded"),
        )
        .into_status()
        .expect("failed entry");
        assert_eq!(PipelineState::Failed, failed.state());
        assert_eq!(Some("exploded"), failed.error().as_deref());

        // legacy label
        let legacy = entry(
            "error",
            Some("2026-08-04T10:30:00"),
            Some("2026-08-04T10:31:00"),
            None,
        )
        .into_status()
        .expect("legacy error entry");
        assert_eq!(PipelineState::Failed, legacy.state());
        assert!(legacy.error().is_some());
    }

    #[test]
    fn invariant_breaking_entries_are_rejected() {
        assert!(entry("running", None, None, None).into_status().is_none());
        assert!(entry("completed", Some("2026-08-04T10:30:00"), None, None)
            .into_status()
            .is_none());
        assert!(entry("launching", Some("2026-08-04T10:30:00"), None, None)
            .into_status()
            .is_none());
    }

    #[test]
    fn malformed_entries_are_skipped_not_fatal() {
        let mut raw = HashMap::new();
        raw.insert(
            "apollo".to_string(),
            entry("running", Some("2026-08-04T10:30:00"), None, None),
        );
        raw.insert("hubspot".to_string(), entry("warming-up", None, None, None));

        let statuses = decode_statuses(raw);
        assert_eq!(1, statuses.len());
        assert!(statuses.contains_key(&PipelineId::new("apollo")));
    }

    #[test]
    fn start_responses_classify_by_status_code() {
        assert_eq!(
            StartDisposition::Started,
            classify_start(StatusCode::ACCEPTED)
        );
        assert_eq!(StartDisposition::Started, classify_start(StatusCode::OK));
        assert_eq!(
            StartDisposition::Conflict,
            classify_start(StatusCode::CONFLICT)
        );
        assert_eq!(
            StartDisposition::Failure,
            classify_start(StatusCode::INTERNAL_SERVER_ERROR)
        );
        assert_eq!(
            StartDisposition::Failure,
            classify_start(StatusCode::NOT_FOUND)
        );
    }
}
