//! Rollout engine errors.

use fleet_core::Component;
use fleet_state::{RolloutId, RolloutStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout not found: {0}")]
    NotFound(RolloutId),

    #[error("rollout {rollout_id} is already active for {component}")]
    ActiveRolloutExists {
        component: Component,
        rollout_id: RolloutId,
    },

    #[error("no tenants need {component} {version}")]
    NoEligibleTenants { component: Component, version: String },

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("invalid semantic version '{0}'")]
    InvalidVersion(String),

    #[error("invalid rollout request: {0}")]
    InvalidRequest(String),

    #[error("cannot {action} rollout {rollout_id} in status {status}")]
    InvalidState {
        rollout_id: RolloutId,
        status: RolloutStatus,
        action: &'static str,
    },

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type RolloutResult<T> = Result<T, RolloutError>;
