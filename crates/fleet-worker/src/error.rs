//! Worker errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue error: {0}")]
    Queue(#[from] fleet_queue::QueueError),

    #[error("registry error: {0}")]
    Registry(#[from] fleet_registry::RegistryError),

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
