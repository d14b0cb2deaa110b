//! Notification error types.

use thiserror::Error;

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors from notification channels.
///
/// These are logged by the dispatcher and never escalated.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Channel exists but is disabled.
    #[error("Channel disabled: {0}")]
    ChannelDisabled(String),

    /// Delivery failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Channel configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
