use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Rollout(#[from] fleet_rollout::RolloutError),

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type MonitorResult<T> = Result<T, MonitorError>;
