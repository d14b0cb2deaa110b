//! Alert error types.

use thiserror::Error;

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

/// Errors from rule parsing and evaluation.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Rule names a telemetry parameter that does not exist.
    #[error("Unknown telemetry parameter: {0}")]
    UnknownParameter(String),

    /// Rule names a comparator that does not exist.
    #[error("Unknown comparator: {0}")]
    UnknownComparator(String),
}
