//! Broadcast request entities shared by the orchestrator and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique broadcast request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BroadcastId(pub Uuid);

impl BroadcastId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for BroadcastId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Broadcast request lifecycle state.
///
/// Advances monotonically: created → invoiced → payment_pending → paid →
/// transmitting → completed, with failed reachable from any non-terminal
/// state. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastState {
    Created,
    Invoiced,
    PaymentPending,
    Paid,
    Transmitting,
    Completed,
    Failed,
}

impl BroadcastState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the forward progression, for ordering checks.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Invoiced => 1,
            Self::PaymentPending => 2,
            Self::Paid => 3,
            Self::Transmitting => 4,
            Self::Completed => 5,
            Self::Failed => 6,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Invoiced => "invoiced",
            Self::PaymentPending => "payment_pending",
            Self::Paid => "paid",
            Self::Transmitting => "transmitting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a broadcast request ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The broadcast network refused the submission.
    SubmissionRejected,
    /// Payment failed or was not confirmed within the timeout.
    PaymentFailed,
    /// Transmission never reached a terminal status within the poll budget.
    BroadcastTimeout,
    /// The network reported a terminal failure during transmission.
    TransmissionFailed,
    /// A non-terminal request already exists for this file path.
    DuplicateInFlight,
    /// The operator cancelled before payment.
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SubmissionRejected => "submission_rejected",
            Self::PaymentFailed => "payment_failed",
            Self::BroadcastTimeout => "broadcast_timeout",
            Self::TransmissionFailed => "transmission_failed",
            Self::DuplicateInFlight => "duplicate_in_flight",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment request issued by the broadcast network for a given bid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// BOLT-11 payment request.
    pub payreq: String,
    /// Invoiced amount in millisatoshis.
    pub amount_msat: u64,
}

/// Persistent record of one broadcast request.
///
/// Only the orchestrator mutates a record (single-writer discipline);
/// every state change is persisted before the machine proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub id: BroadcastId,
    /// File queued for broadcast.
    pub file_path: String,
    /// Opaque bid passed through to the network.
    pub bid_msat: u64,
    pub state: BroadcastState,
    /// Set once the network issues an invoice; never more than one
    /// outstanding invoice per request.
    pub invoice: Option<Invoice>,
    /// Network-side message identifier, used for status polling.
    pub network_message_id: Option<String>,
    /// Auth token for the network's status endpoint; required to resume
    /// polling after a restart.
    pub auth_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Populated when `state == Failed`.
    pub error: Option<FailureReason>,
}

impl BroadcastRecord {
    pub fn new(file_path: impl Into<String>, bid_msat: u64) -> Self {
        let now = Utc::now();
        Self {
            id: BroadcastId::new(),
            file_path: file_path.into(),
            bid_msat,
            state: BroadcastState::Created,
            invoice: None,
            network_message_id: None,
            auth_token: None,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_progression_ranks() {
        let order = [
            BroadcastState::Created,
            BroadcastState::Invoiced,
            BroadcastState::PaymentPending,
            BroadcastState::Paid,
            BroadcastState::Transmitting,
            BroadcastState::Completed,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(BroadcastState::Completed.is_terminal());
        assert!(BroadcastState::Failed.is_terminal());
        assert!(!BroadcastState::PaymentPending.is_terminal());
    }

    #[test]
    fn test_new_record_shape() {
        let record = BroadcastRecord::new("/tmp/payload.bin", 10_000);
        assert_eq!(record.state, BroadcastState::Created);
        assert!(record.invoice.is_none());
        assert!(record.error.is_none());
    }
}
