//! Domain types: telemetry readings, commands, and link health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One decoded telemetry sample from the downlink.
///
/// Readings are immutable once persisted and totally ordered by timestamp
/// per link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// When the sample was taken on board.
    pub timestamp: DateTime<Utc>,
    /// Received signal strength, normalized 0.0 - 1.0.
    pub signal_strength: f32,
    /// Signal-to-noise ratio in dB.
    pub snr_db: f32,
    /// Bit error rate.
    pub ber: f32,
    /// Transceiver temperature in degrees Celsius.
    pub temperature_c: f32,
    /// Frames sent by the asset since boot.
    pub packets_sent: u32,
    /// Frames received by the asset since boot.
    pub packets_received: u32,
    /// Identifier of the link that produced this reading.
    pub link_id: String,
}

/// Unique command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for CommandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Command kinds understood by the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Reboot the onboard computer.
    Reboot,
    /// Adjust attitude; parameters carry the steering vector.
    Steer,
    /// Operator-defined opcode.
    Custom(u8),
}

impl CommandKind {
    /// Wire opcode for this command kind.
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Reboot => 0x01,
            Self::Steer => 0x02,
            Self::Custom(code) => *code,
        }
    }

    /// Decode a wire opcode.
    pub fn from_opcode(code: u8) -> Self {
        match code {
            0x01 => Self::Reboot,
            0x02 => Self::Steer,
            other => Self::Custom(other),
        }
    }
}

/// Command lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Created, not yet written to the link.
    Pending,
    /// Written to the link, awaiting acknowledgment.
    Sent,
    /// Acknowledged by the asset.
    Acked,
    /// Rejected, timed out, or the link was unavailable.
    Failed,
}

impl CommandStatus {
    /// Terminal states are final and never retried automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Acked | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Acked => "acked",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A command issued to the asset.
///
/// Owned by the link session from issue until it reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Unique, immutable id.
    pub id: CommandId,
    /// What the command does.
    pub kind: CommandKind,
    /// Ordered key/value parameters.
    pub parameters: Vec<(String, String)>,
    /// When the operator issued the command.
    pub issued_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: CommandStatus,
}

impl Command {
    /// Create a new pending command.
    pub fn new(kind: CommandKind, parameters: Vec<(String, String)>) -> Self {
        Self {
            id: CommandId::new(),
            kind,
            parameters,
            issued_at: Utc::now(),
            status: CommandStatus::Pending,
        }
    }
}

/// Link connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    /// Transport is up and frames are flowing.
    Connected,
    /// Transport lost; reconnect attempts in progress.
    Degraded,
    /// Reconnect ceiling exceeded; waiting for an explicit reconnect.
    Disconnected,
}

impl LinkStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A threshold violation produced by the alert evaluator.
///
/// Immutable once created except for `acknowledged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: Uuid,
    /// Name of the violated telemetry parameter.
    pub parameter: String,
    /// Observed value at trigger time.
    pub value: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// Comparator that fired, e.g. `lt`.
    pub comparator: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Transient, process-scoped link health snapshot. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkHealth {
    /// Current connection status.
    pub status: LinkStatus,
    /// When the last telemetry reading was decoded.
    pub last_reading_at: Option<DateTime<Utc>>,
    /// Consecutive failed connection attempts.
    pub reconnect_attempts: u32,
}

impl LinkHealth {
    /// Health of a session that has not connected yet.
    pub fn starting() -> Self {
        Self {
            status: LinkStatus::Degraded,
            last_reading_at: None,
            reconnect_attempts: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_kind_opcode_round_trip() {
        assert_eq!(CommandKind::from_opcode(CommandKind::Reboot.opcode()), CommandKind::Reboot);
        assert_eq!(CommandKind::from_opcode(CommandKind::Steer.opcode()), CommandKind::Steer);
        assert_eq!(
            CommandKind::from_opcode(CommandKind::Custom(0x7A).opcode()),
            CommandKind::Custom(0x7A)
        );
    }

    #[test]
    fn test_command_status_terminal() {
        assert!(!CommandStatus::Pending.is_terminal());
        assert!(!CommandStatus::Sent.is_terminal());
        assert!(CommandStatus::Acked.is_terminal());
        assert!(CommandStatus::Failed.is_terminal());
    }

    #[test]
    fn test_new_command_is_pending_with_unique_id() {
        let a = Command::new(CommandKind::Reboot, vec![]);
        let b = Command::new(CommandKind::Reboot, vec![]);
        assert_eq!(a.status, CommandStatus::Pending);
        assert_ne!(a.id, b.id);
    }
}
