//! Error types for core parsing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid version range: {0}")]
    InvalidRange(String),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),
}
