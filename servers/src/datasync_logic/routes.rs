//! HTTP surface of the sync server.
//!
//! - `GET /status`: orchestrator state and a summary of the last epoch.
//! - `GET /player/{ally_code}`: read-through player lookup, `X-Cache: HIT|MISS`.
//! - `POST /sync`: runs a manual epoch and returns its summary, `409` while one is in flight.
//!   The epoch runs on its own task and finishes even if the client goes away.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_datasync::SyncError;
use lib_datasync::core::{SyncEpoch, Trigger};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{info, warn};

use super::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/player/{ally_code}", get(player))
        .route("/sync", post(trigger_sync))
        .with_state(state)
}

/// Library and task errors as HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Sync(SyncError),
    /// The epoch task panicked or was aborted.
    Task(JoinError),
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        AppError::Sync(e)
    }
}

impl From<JoinError> for AppError {
    fn from(e: JoinError) -> Self {
        AppError::Task(e)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        let AppError::Sync(error) = self else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        match error {
            SyncError::InvalidAllyCode(_) => StatusCode::BAD_REQUEST,
            SyncError::EpochInFlight => StatusCode::CONFLICT,
            SyncError::UpstreamError { status: 404, .. } => StatusCode::NOT_FOUND,
            SyncError::UpstreamError { .. }
            | SyncError::UpstreamUnreachable(_)
            | SyncError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            SyncError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            SyncError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Sync(e) => json!({ "error": e }),
            AppError::Task(e) => json!({ "error": { "class": "Internal", "message": e.to_string() } }),
        };
        if status.is_server_error() {
            warn!(status = status.as_u16(), "Request failed: {}", body["error"]);
        }
        (status, Json(body)).into_response()
    }
}

/// Compact JSON view of an epoch for the API.
pub fn epoch_summary(epoch: &SyncEpoch) -> Value {
    let versions: Vec<Value> = epoch
        .kinds
        .iter()
        .map(|k| {
            json!({
                "kind": k.kind,
                "old": k.old_version,
                "new": k.new_version,
                "committed": k.committed,
            })
        })
        .collect();
    let failed: Vec<Value> = epoch
        .segments_failed()
        .into_iter()
        .map(|(target, error)| json!({ "target": target.to_string(), "error": error }))
        .collect();
    let processed: Vec<String> = epoch
        .segments_processed()
        .iter()
        .map(ToString::to_string)
        .collect();
    let unknown: Vec<String> = epoch.unknown_changes.iter().map(ToString::to_string).collect();

    json!({
        "trigger": epoch.trigger,
        "triggerTime": epoch.trigger_time,
        "finishedAt": epoch.finished_at,
        "outcome": epoch.outcome,
        "versions": versions,
        "segmentsProcessed": processed,
        "segmentsFailed": failed,
        "changed": epoch.diff_summary.touched_by_collection(),
        "removed": epoch.diff_summary.removed.len(),
        "unknownChanges": unknown,
        "error": epoch.error,
        "cancelled": epoch.cancelled,
    })
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let last = state.orchestrator.last_epoch().await;
    Json(json!({
        "state": state.orchestrator.state(),
        "running": state.orchestrator.is_running(),
        "lastEpoch": last.as_deref().map(epoch_summary),
    }))
}

async fn player(
    State(state): State<AppState>,
    Path(ally_code): Path<String>,
) -> Result<Response, AppError> {
    let (record, lookup) = state.players.get_player(&ally_code).await?;
    Ok(([("x-cache", lookup.as_header())], Json(&*record)).into_response())
}

async fn trigger_sync(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    info!("Manual sync requested");
    let orchestrator = Arc::clone(&state.orchestrator);
    let cancel = state.cancel.child_token();
    let run = tokio::spawn(async move { orchestrator.run_epoch(Trigger::Manual, cancel).await });
    let epoch = run.await??;
    Ok(Json(epoch_summary(&epoch)))
}
