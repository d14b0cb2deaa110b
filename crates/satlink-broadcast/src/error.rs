//! Broadcast error types.

use thiserror::Error;

use satlink_core::{BroadcastId, BroadcastState};
use satlink_storage::StorageError;

/// Result type for broadcast operations.
pub type Result<T> = std::result::Result<T, BroadcastError>;

/// Errors from the external broadcast network and payment gateways.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The network refused the submission.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// HTTP-level failure talking to the network.
    #[error("Network gateway error: {0}")]
    Http(String),

    /// The payer capability failed.
    #[error("Payment gateway error: {0}")]
    Payer(String),

    /// The gateway answered with something unparseable.
    #[error("Bad gateway response: {0}")]
    BadResponse(String),

    /// Local I/O failure (reading the broadcast file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to callers of the orchestrator.
///
/// None of these are retried automatically: retrying a payment or a paid
/// transmission risks double-spend or duplicate broadcast cost.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The network refused the file/bid submission.
    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    /// Payment failed or timed out.
    #[error("Payment failed")]
    PaymentFailed,

    /// Transmission polling exceeded its budget.
    #[error("Broadcast timed out")]
    BroadcastTimeout,

    /// A non-terminal request already exists for this file path.
    #[error("Broadcast already in flight for {0}")]
    DuplicateInFlight(String),

    /// The request was cancelled by the operator.
    #[error("Broadcast cancelled")]
    Cancelled,

    /// Cancellation refused: payment is irreversible from this state on.
    #[error("Cancel refused in state {0}")]
    CancelRefused(BroadcastState),

    /// No such broadcast request.
    #[error("Unknown broadcast request: {0}")]
    UnknownRequest(BroadcastId),

    /// Persistence failed; the state machine stops rather than run ahead
    /// of its durable record.
    #[error("Broadcast storage error: {0}")]
    Storage(#[from] StorageError),
}
