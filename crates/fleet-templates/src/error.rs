//! Template repository errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid semantic version '{0}'")]
    InvalidVersion(String),

    #[error("invalid workflow name '{0}': use letters, digits, '_' or '-'")]
    InvalidWorkflowName(String),

    #[error("template {workflow}@{version} already exists")]
    Duplicate { workflow: String, version: String },

    #[error("template {workflow}@{version} not found")]
    NotFound { workflow: String, version: String },

    #[error("invalid template definition: {0}")]
    InvalidDefinition(String),

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type TemplateResult<T> = Result<T, TemplateError>;
