//! Error types for the link layer.

use thiserror::Error;

use crate::frame::FrameError;

/// Result type for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Errors surfaced to callers of the link session.
///
/// Transport and frame problems inside the receive loop are handled locally
/// by the reconnect logic; they reach callers only as link-health state.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The transport is not connected; the command was rejected, not queued.
    #[error("Link unavailable")]
    Unavailable,

    /// No acknowledgment arrived within the configured timeout.
    #[error("Acknowledgment timed out")]
    AckTimeout,

    /// The asset acknowledged the command with a rejection.
    #[error("Command rejected by asset")]
    Rejected,

    /// Transport-level I/O failure.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Frame encoding or decoding failure.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The session has shut down.
    #[error("Link session closed")]
    Closed,
}
