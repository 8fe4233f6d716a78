//! Read-only REST handlers: dashboard, fleet, tenants, queue, history.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use fleet_core::check_compatibility;
use serde::Deserialize;

use crate::ApiState;
use crate::error::{ApiError, ApiResponse, ApiResult};

const DEFAULT_HISTORY_LIMIT: usize = 50;

// ── Monitor ────────────────────────────────────────────────────

/// GET /api/v1/dashboard
pub async fn dashboard(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.monitor.get_dashboard_data()?))
}

/// GET /api/v1/fleet
pub async fn fleet_overview(State(state): State<ApiState>) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.monitor.get_fleet_overview()?))
}

// ── Tenants ────────────────────────────────────────────────────

/// GET /api/v1/tenants/{id}
pub async fn get_tenant(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.registry.get_tenant(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct CompatibilityQuery {
    pub dashboard: Option<String>,
    pub agent: Option<String>,
    pub workflow: Option<String>,
}

/// GET /api/v1/compatibility?dashboard=&agent=&workflow=
pub async fn compatibility(Query(q): Query<CompatibilityQuery>) -> ApiResult<impl IntoResponse> {
    let (Some(dashboard), Some(agent), Some(workflow)) = (q.dashboard, q.agent, q.workflow) else {
        return Err(ApiError::bad_request(
            "dashboard, agent and workflow versions are required",
        ));
    };
    Ok(ApiResponse::ok(check_compatibility(&dashboard, &agent, &workflow)))
}

// ── Queue & history ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RolloutFilter {
    pub rollout: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/v1/queue/stats?rollout=
pub async fn queue_stats(
    State(state): State<ApiState>,
    Query(filter): Query<RolloutFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(
        state.queue.get_queue_stats(filter.rollout.as_deref())?,
    ))
}

/// GET /api/v1/history?rollout=&limit=
pub async fn history(
    State(state): State<ApiState>,
    Query(filter): Query<RolloutFilter>,
) -> ApiResult<impl IntoResponse> {
    let entries = match filter.rollout {
        Some(rollout) => state.store.list_history_for_rollout(&rollout)?,
        None => state
            .store
            .list_history(filter.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1))?,
    };
    Ok(ApiResponse::ok(entries))
}
