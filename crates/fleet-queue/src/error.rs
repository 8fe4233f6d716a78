//! Queue error types.

use fleet_state::{JobId, JobStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {job} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type QueueResult<T> = Result<T, QueueError>;
