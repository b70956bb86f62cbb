use thiserror::Error;

use siprems_core::{DomainError, TargetId};

use crate::source::SourceError;

/// Failure of a forecasting operation.
///
/// Recoverable conditions are distinct variants so callers can react:
/// `InsufficientData` (wait for more history), `ModelNotFound` (train first).
#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("insufficient data: need at least {needed} daily rows, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("model not found for target {0}; train the model first")]
    ModelNotFound(TargetId),

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("upstream data unavailable: {0}")]
    UpstreamDataUnavailable(String),

    #[error("artifact store error: {0}")]
    Artifact(String),

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ForecastError {
    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }

    pub fn fit(msg: impl Into<String>) -> Self {
        Self::Fit(msg.into())
    }
}

impl From<DomainError> for ForecastError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidDate(msg) => Self::InvalidDate(msg),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

impl From<SourceError> for ForecastError {
    fn from(value: SourceError) -> Self {
        Self::UpstreamDataUnavailable(value.to_string())
    }
}
