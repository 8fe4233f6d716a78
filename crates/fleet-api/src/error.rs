//! Response envelope and error → status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleet_monitor::MonitorError;
use fleet_queue::QueueError;
use fleet_registry::RegistryError;
use fleet_rollout::RolloutError;
use fleet_state::StateError;
use fleet_templates::TemplateError;
use serde::Serialize;
use tracing::error;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// A failed request: status code plus message for the envelope.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "request failed");
        }
        (
            self.status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(self.message),
            }),
        )
            .into_response()
    }
}

fn state_status(e: &StateError) -> StatusCode {
    match e {
        StateError::NotFound(_) => StatusCode::NOT_FOUND,
        StateError::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        Self::new(state_status(&e), e.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let status = match &e {
            RegistryError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::State(inner) => state_status(inner),
        };
        Self::new(status, e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        let status = match &e {
            QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
            QueueError::InvalidTransition { .. } => StatusCode::CONFLICT,
            QueueError::State(inner) => state_status(inner),
        };
        Self::new(status, e.to_string())
    }
}

impl From<RolloutError> for ApiError {
    fn from(e: RolloutError) -> Self {
        let status = match &e {
            RolloutError::NotFound(_) | RolloutError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            RolloutError::ActiveRolloutExists { .. }
            | RolloutError::NoEligibleTenants { .. }
            | RolloutError::InvalidState { .. } => StatusCode::CONFLICT,
            RolloutError::InvalidVersion(_) | RolloutError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            RolloutError::State(inner) => state_status(inner),
        };
        Self::new(status, e.to_string())
    }
}

impl From<TemplateError> for ApiError {
    fn from(e: TemplateError) -> Self {
        let status = match &e {
            TemplateError::NotFound { .. } => StatusCode::NOT_FOUND,
            TemplateError::Duplicate { .. } => StatusCode::CONFLICT,
            TemplateError::InvalidVersion(_)
            | TemplateError::InvalidWorkflowName(_)
            | TemplateError::InvalidDefinition(_) => {
                StatusCode::BAD_REQUEST
            }
            TemplateError::State(inner) => state_status(inner),
        };
        Self::new(status, e.to_string())
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::Rollout(inner) => inner.into(),
            MonitorError::State(inner) => inner.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
