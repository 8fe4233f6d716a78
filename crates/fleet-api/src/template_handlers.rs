//! REST handlers for the golden template repository.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use fleet_templates::PublishRequest;
use serde::Deserialize;
use serde_json::json;

use crate::ApiState;
use crate::error::{ApiError, ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub promoted_by: String,
}

/// POST /api/v1/templates
pub async fn publish_template(
    State(state): State<ApiState>,
    Json(req): Json<PublishRequest>,
) -> ApiResult<impl IntoResponse> {
    let template = state.templates.publish_template_version(req)?;
    Ok((StatusCode::CREATED, ApiResponse::ok(template)))
}

/// GET /api/v1/templates/{workflow}
pub async fn list_templates(
    State(state): State<ApiState>,
    Path(workflow): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let versions = state.templates.list_versions(&workflow)?;
    let current = versions.iter().find(|t| t.is_current).map(|t| t.version.clone());
    Ok(ApiResponse::ok(json!({
        "workflow": workflow,
        "current": current,
        "versions": versions,
    })))
}

/// GET /api/v1/templates/{workflow}/{version}
pub async fn get_template(
    State(state): State<ApiState>,
    Path((workflow, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(
        state.templates.get_template_version(&workflow, &version)?,
    ))
}

/// GET /api/v1/templates/{workflow}/compare?from=&to=
pub async fn compare_templates(
    State(state): State<ApiState>,
    Path(workflow): Path<String>,
    Query(q): Query<CompareQuery>,
) -> ApiResult<impl IntoResponse> {
    let (Some(from), Some(to)) = (q.from, q.to) else {
        return Err(ApiError::bad_request("both 'from' and 'to' are required"));
    };
    Ok(ApiResponse::ok(
        state.templates.compare_template_versions(&workflow, &from, &to)?,
    ))
}

/// POST /api/v1/templates/{workflow}/{version}/promote
pub async fn promote_template(
    State(state): State<ApiState>,
    Path((workflow, version)): Path<(String, String)>,
    Json(req): Json<PromoteRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.templates.promote_to_current_version(
        &workflow,
        &version,
        &req.promoted_by,
    )?))
}

/// POST /api/v1/templates/{workflow}/{version}/canary
pub async fn mark_canary(
    State(state): State<ApiState>,
    Path((workflow, version)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(ApiResponse::ok(state.templates.mark_canary(&workflow, &version)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::FleetConfig;
    use fleet_state::StateStore;

    fn test_state() -> ApiState {
        ApiState::new(StateStore::open_in_memory().unwrap(), &FleetConfig::default())
    }

    fn publish(version: &str, nodes: serde_json::Value) -> Json<PublishRequest> {
        Json(PublishRequest {
            workflow_name: "email_1".into(),
            version: version.into(),
            definition: json!({ "nodes": nodes, "connections": {} }),
            changelog: String::new(),
            published_by: "author".into(),
        })
    }

    #[tokio::test]
    async fn publish_duplicate_and_invalid() {
        let state = test_state();
        let resp = publish_template(State(state.clone()), publish("1.0.0", json!([])))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = publish_template(State(state.clone()), publish("1.0.0", json!([])))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = publish_template(State(state.clone()), publish("v1.0.0", json!([])))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = publish_template(State(state.clone()), publish("one", json!([])))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let mut req = publish("2.0.0", json!([]));
        req.workflow_name = "email_1@beta".into();
        let resp = publish_template(State(state.clone()), req).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.templates.list_versions("email_1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn promote_and_compare() {
        let state = test_state();
        for (version, nodes) in [
            ("1.0.0", json!([{ "name": "a" }, { "name": "b" }])),
            ("1.1.0", json!([{ "name": "a" }])),
        ] {
            let resp = publish_template(State(state.clone()), publish(version, nodes))
                .await
                .into_response();
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let resp = promote_template(
            State(state.clone()),
            Path(("email_1".into(), "1.1.0".into())),
            Json(PromoteRequest {
                promoted_by: "lead".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let current = state.templates.get_current_version("email_1").unwrap().unwrap();
        assert_eq!(current.version, "1.1.0");

        let resp = compare_templates(
            State(state.clone()),
            Path("email_1".into()),
            Query(CompareQuery {
                from: Some("1.0.0".into()),
                to: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let diff = state
            .templates
            .compare_template_versions("email_1", "1.0.0", "1.1.0")
            .unwrap();
        assert!(diff.breaking);
    }

    #[tokio::test]
    async fn promoting_missing_version_is_not_found() {
        let resp = promote_template(
            State(test_state()),
            Path(("email_1".into(), "9.9.9".into())),
            Json(PromoteRequest {
                promoted_by: "lead".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
