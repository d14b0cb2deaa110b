//! Configuration tree for the Satlink engine.
//!
//! Loaded from a TOML file by the binary. Every duration knob has a serde
//! default so a minimal config only needs the transport endpoint.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Transport endpoint, selected at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Stream socket to a modem or network gateway.
    Tcp { host: String, port: u16 },
    /// Datagram socket; `peer` is the single remote endpoint.
    Udp { bind: String, peer: String },
    /// Serial line to local radio hardware.
    Serial { device: String, baud_rate: u32 },
}

impl TransportConfig {
    /// Human-readable endpoint for logging.
    pub fn endpoint(&self) -> String {
        match self {
            Self::Tcp { host, port } => format!("tcp://{}:{}", host, port),
            Self::Udp { bind, peer } => format!("udp://{} -> {}", bind, peer),
            Self::Serial { device, baud_rate } => format!("serial://{}@{}", device, baud_rate),
        }
    }
}

/// Exponential backoff parameters for reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,
    /// Upper bound on the delay, in milliseconds.
    #[serde(default = "default_backoff_cap_ms")]
    pub cap_ms: u64,
    /// Attempts before the session gives up and reports disconnected.
    #[serde(default = "default_backoff_ceiling")]
    pub max_attempts: u32,
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_backoff_ceiling() -> u32 {
    10
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            cap_ms: default_backoff_cap_ms(),
            max_attempts: default_backoff_ceiling(),
        }
    }
}

impl BackoffConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

/// Link session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Identifier stamped on every reading from this session.
    #[serde(default = "default_link_id")]
    pub link_id: String,
    /// Transport endpoint.
    pub transport: TransportConfig,
    /// How long to wait for a command acknowledgment.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Reconnect backoff parameters.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Checksum-failed frames within the window that force a reconnect.
    #[serde(default = "default_frame_error_threshold")]
    pub frame_error_threshold: u32,
    /// Sliding window for the frame-error rate, in seconds.
    #[serde(default = "default_frame_error_window_secs")]
    pub frame_error_window_secs: u64,
    /// Deadline for assembling all chunks of a photo.
    #[serde(default = "default_photo_timeout_secs")]
    pub photo_timeout_secs: u64,
    /// Bounded capacity of the telemetry event bus.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_link_id() -> String {
    "sat-0".to_string()
}

fn default_ack_timeout_secs() -> u64 {
    5
}

fn default_frame_error_threshold() -> u32 {
    8
}

fn default_frame_error_window_secs() -> u64 {
    10
}

fn default_photo_timeout_secs() -> u64 {
    60
}

fn default_bus_capacity() -> usize {
    crate::eventbus::DEFAULT_BUS_CAPACITY
}

impl LinkConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn frame_error_window(&self) -> Duration {
        Duration::from_secs(self.frame_error_window_secs)
    }

    pub fn photo_timeout(&self) -> Duration {
        Duration::from_secs(self.photo_timeout_secs)
    }
}

/// One alert rule as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleConfig {
    /// Telemetry parameter name: `signal_strength`, `snr_db`, `ber`,
    /// `temperature_c`, `packets_sent`, `packets_received`.
    pub parameter: String,
    /// Comparator: `gt`, `ge`, `lt`, `le`.
    pub comparator: String,
    /// Threshold the parameter is compared against.
    pub threshold: f64,
    /// Minimum time between successive events for this rule.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    300
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the redb database file.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "satlink.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Notification channel configuration.
///
/// Each entry is passed to the matching channel factory; the schema depends
/// on the channel type (console, memory, webhook, email).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub channels: Vec<serde_json::Value>,
}

/// Broadcast orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Base URL of the satellite-broadcast order API.
    #[serde(default = "default_broadcast_api")]
    pub api_base: String,
    /// Default bid when the operator does not specify one.
    #[serde(default = "default_bid_msat")]
    pub default_bid_msat: u64,
    /// Interval between payment status polls, in seconds.
    #[serde(default = "default_payment_poll_secs")]
    pub payment_poll_secs: u64,
    /// Give up waiting for payment confirmation after this long.
    #[serde(default = "default_payment_timeout_secs")]
    pub payment_timeout_secs: u64,
    /// Interval between transmission status polls, in seconds.
    #[serde(default = "default_status_poll_secs")]
    pub status_poll_secs: u64,
    /// Give up polling transmission status after this long.
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
    /// Path to the Core Lightning CLI used to settle invoices.
    #[serde(default = "default_lightning_cli")]
    pub lightning_cli: String,
}

fn default_broadcast_api() -> String {
    "https://api.blockstream.space".to_string()
}

fn default_bid_msat() -> u64 {
    10_000
}

fn default_payment_poll_secs() -> u64 {
    5
}

fn default_payment_timeout_secs() -> u64 {
    120
}

fn default_status_poll_secs() -> u64 {
    10
}

fn default_status_timeout_secs() -> u64 {
    300
}

fn default_lightning_cli() -> String {
    "lightning-cli".to_string()
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            api_base: default_broadcast_api(),
            default_bid_msat: default_bid_msat(),
            payment_poll_secs: default_payment_poll_secs(),
            payment_timeout_secs: default_payment_timeout_secs(),
            status_poll_secs: default_status_poll_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            lightning_cli: default_lightning_cli(),
        }
    }
}

impl BroadcastConfig {
    pub fn payment_poll_interval(&self) -> Duration {
        Duration::from_secs(self.payment_poll_secs)
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatlinkConfig {
    pub link: LinkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub alerts: Vec<AlertRuleConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl SatlinkConfig {
    /// Load and validate a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.link.backoff.base_ms == 0 {
            return Err(Error::InvalidConfiguration(
                "backoff base_ms must be positive".to_string(),
            ));
        }
        if self.link.backoff.cap_ms < self.link.backoff.base_ms {
            return Err(Error::InvalidConfiguration(
                "backoff cap_ms must be >= base_ms".to_string(),
            ));
        }
        if self.link.bus_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "bus_capacity must be positive".to_string(),
            ));
        }
        for rule in &self.alerts {
            if !matches!(rule.comparator.as_str(), "gt" | "ge" | "lt" | "le") {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown comparator: {}",
                    rule.comparator
                )));
            }
        }
        Ok(())
    }
}
