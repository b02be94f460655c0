use poem_openapi::payload::Json;
use poem_openapi::*;

use crate::api::{ApiTags, AppState};
use crate::status::{ReconcilerState, StatusSnapshot};

pub struct SyncApi {
    state: AppState,
}

impl SyncApi {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Object)]
pub struct SyncTriggerResponse {
    pub accepted: bool,
    pub message: String,
}

/// A poem-openapi-friendly mirror of [`crate::status::TickSummary`] — the
/// domain type stays free of a web-framework dependency, so the API edge
/// restates its shape with timestamps as RFC 3339 strings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Object)]
pub struct TickSummaryResponse {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub successes: u64,
    pub errors: u64,
    pub dry_run: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Object)]
pub struct StatusResponse {
    pub state: String,
    pub last_sync_time: i64,
    pub last_tick: Option<TickSummaryResponse>,
}

impl From<StatusSnapshot> for StatusResponse {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self {
            state: match snapshot.state {
                ReconcilerState::Idle => "idle".to_string(),
                ReconcilerState::Running => "running".to_string(),
            },
            last_sync_time: snapshot.last_sync_time,
            last_tick: snapshot.last_tick.map(|tick| TickSummaryResponse {
                started_at: tick.started_at.to_rfc3339(),
                finished_at: tick.finished_at.map(|t| t.to_rfc3339()),
                successes: tick.successes,
                errors: tick.errors,
                dry_run: tick.dry_run,
                message: tick.message,
            }),
        }
    }
}

#[OpenApi(prefix_path = "/", tag = ApiTags::Reconciler)]
impl SyncApi {
    /// Trigger one tick immediately. Idempotent under the single-flight
    /// rule: if a tick is already running, this returns `accepted: false`
    /// rather than queuing a second one.
    #[oai(path = "/sync", method = "post", operation_id = "sync")]
    async fn sync(&self) -> Json<SyncTriggerResponse> {
        match self.state.scheduler.trigger_now().await {
            Some(Ok(())) => Json(SyncTriggerResponse {
                accepted: true,
                message: "tick completed".to_string(),
            }),
            Some(Err(e)) => Json(SyncTriggerResponse {
                accepted: true,
                message: format!(
                    "tick failed: {}",
                    crate::error::SafeDisplay::to_safe_string(&e)
                ),
            }),
            None => Json(SyncTriggerResponse {
                accepted: false,
                message: "a tick is already in progress".to_string(),
            }),
        }
    }

    /// Snapshot of the last tick and current Reconciler state.
    #[oai(path = "/status", method = "get", operation_id = "status")]
    async fn status(&self) -> Json<StatusResponse> {
        Json(self.state.status.snapshot().into())
    }
}
