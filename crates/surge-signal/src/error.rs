//! Signal source error types.

use thiserror::Error;

/// Errors a snapshot source can report.
///
/// Consumers inside the loop swallow these into "no pressure" or "keep
/// the last good snapshot"; they exist so harness implementations have a
/// typed seam rather than a stringly one.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("metrics source unavailable: {0}")]
    MetricsUnavailable(String),

    #[error("pool source unavailable: {0}")]
    PoolUnavailable(String),

    #[error("source error: {0}")]
    Source(#[from] anyhow::Error),
}

pub type SignalResult<T> = Result<T, SignalError>;
