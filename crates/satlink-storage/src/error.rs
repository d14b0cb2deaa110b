//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors from a telemetry store backend.
///
/// Callers on the telemetry path log these and keep going; data loss is
/// possible and is surfaced as a degraded-storage signal, never a crash.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend-specific failure (database error, corruption).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Filesystem-level failure.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A row did not serialize or deserialize.
    #[error("Storage codec error: {0}")]
    Codec(String),

    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}
