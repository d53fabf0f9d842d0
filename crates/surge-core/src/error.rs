//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating a `LoadConfig`.
///
/// All of these are fatal at construction time; a running load loop
/// never surfaces them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config syntax: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid rate settings: {0}")]
    InvalidRate(String),

    #[error("invalid watermarks: {0}")]
    InvalidWatermark(String),

    #[error("invalid admission settings: {0}")]
    InvalidAdmission(String),

    #[error("invalid batch settings: {0}")]
    InvalidBatch(String),

    #[error("invalid signal settings: {0}")]
    InvalidSignal(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
