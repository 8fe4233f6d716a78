//! Sidecar protocol and control-endpoint errors.

use thiserror::Error;

/// A remote command against a tenant's control endpoint failed.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid control endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("connect to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("request {path} failed: {reason}")]
    Request { path: String, reason: String },

    #[error("{path} returned {status}: {body}")]
    Status {
        path: String,
        status: u16,
        body: String,
    },

    #[error("{path} timed out")]
    Timeout { path: String },

    #[error("invalid response from {path}: {reason}")]
    Decode { path: String, reason: String },
}

pub type ControlResult<T> = Result<T, ControlError>;

/// Failures that prevent the protocol from recording its outcome.
#[derive(Debug, Error)]
pub enum SidecarError {
    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),

    #[error("registry error: {0}")]
    Registry(#[from] fleet_registry::RegistryError),
}

pub type SidecarResult<T> = Result<T, SidecarError>;
