//! REST handlers for rollout management and emergency rollback.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fleet_rollout::{EmergencyRollbackRequest, RolloutRequest};
use serde::Deserialize;
use tracing::info;

use crate::ApiState;
use crate::error::{ApiResponse, ApiResult};

/// Body for pause, resume and abort.
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    #[serde(default = "default_actor")]
    pub by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_actor() -> String {
    "api".to_string()
}

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.engine.list_rollouts()?))
}

/// POST /api/v1/rollouts
pub async fn initiate_rollout(
    State(state): State<ApiState>,
    Json(req): Json<RolloutRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state.engine.initiate_rollout(req)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(session)))
}

/// GET /api/v1/rollouts/{id}
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.engine.get_rollout(&id)?))
}

/// GET /api/v1/rollouts/{id}/progress
pub async fn rollout_progress(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.monitor.get_rollout_progress(&id)?))
}

/// POST /api/v1/rollouts/{id}/advance
pub async fn advance_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.engine.advance_rollout(&id)?))
}

/// POST /api/v1/rollouts/{id}/pause
pub async fn pause_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> ApiResult<impl IntoResponse> {
    let reason = req.reason.as_deref().unwrap_or("paused by operator");
    Ok(ApiResponse::ok(state.engine.pause_rollout(&id, &req.by, reason)?))
}

/// POST /api/v1/rollouts/{id}/resume
pub async fn resume_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.engine.resume_rollout(&id, &req.by)?))
}

/// POST /api/v1/rollouts/{id}/abort
pub async fn abort_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> ApiResult<impl IntoResponse> {
    let reason = req.reason.as_deref().unwrap_or("aborted by operator");
    Ok(ApiResponse::ok(state.engine.abort_rollout(&id, &req.by, reason)?))
}

/// POST /api/v1/emergency-rollback
///
/// Returns once the rollback jobs are enqueued; progress is visible through
/// the rollout and queue endpoints.
pub async fn emergency_rollback(
    State(state): State<ApiState>,
    Json(req): Json<EmergencyRollbackRequest>,
) -> ApiResult<impl IntoResponse> {
    info!(component = %req.component, to = %req.rollback_to_version, by = %req.initiated_by, "emergency rollback requested");
    let result = state.engine.execute_emergency_rollback(req)?;
    Ok((StatusCode::ACCEPTED, ApiResponse::ok(result)))
}
