//! Registry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;
