//! Alert rules: parameter, comparator, threshold, cooldown.

use std::time::Duration;

use satlink_core::{AlertRuleConfig, TelemetryReading};

use crate::error::{AlertError, Result};

/// Monitored telemetry parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryParameter {
    SignalStrength,
    SnrDb,
    Ber,
    TemperatureC,
    PacketsSent,
    PacketsReceived,
}

impl TelemetryParameter {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "signal_strength" => Ok(Self::SignalStrength),
            "snr_db" => Ok(Self::SnrDb),
            "ber" => Ok(Self::Ber),
            "temperature_c" => Ok(Self::TemperatureC),
            "packets_sent" => Ok(Self::PacketsSent),
            "packets_received" => Ok(Self::PacketsReceived),
            other => Err(AlertError::UnknownParameter(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::SignalStrength => "signal_strength",
            Self::SnrDb => "snr_db",
            Self::Ber => "ber",
            Self::TemperatureC => "temperature_c",
            Self::PacketsSent => "packets_sent",
            Self::PacketsReceived => "packets_received",
        }
    }

    /// Pull this parameter out of a reading.
    pub fn extract(&self, reading: &TelemetryReading) -> f64 {
        match self {
            Self::SignalStrength => reading.signal_strength as f64,
            Self::SnrDb => reading.snr_db as f64,
            Self::Ber => reading.ber as f64,
            Self::TemperatureC => reading.temperature_c as f64,
            Self::PacketsSent => reading.packets_sent as f64,
            Self::PacketsReceived => reading.packets_received as f64,
        }
    }
}

impl std::fmt::Display for TelemetryParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Threshold comparator.
///
/// Float equality on sampled telemetry is meaningless, so only the four
/// orderings exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Comparator {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "gt" => Ok(Self::GreaterThan),
            "ge" => Ok(Self::GreaterOrEqual),
            "lt" => Ok(Self::LessThan),
            "le" => Ok(Self::LessOrEqual),
            other => Err(AlertError::UnknownComparator(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::GreaterThan => "gt",
            Self::GreaterOrEqual => "ge",
            Self::LessThan => "lt",
            Self::LessOrEqual => "le",
        }
    }

    /// `true` when `value` violates the threshold.
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessOrEqual => value <= threshold,
        }
    }
}

impl std::fmt::Display for Comparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One alert rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    pub parameter: TelemetryParameter,
    pub comparator: Comparator,
    pub threshold: f64,
    /// Minimum time between successive events for this rule.
    pub cooldown: Duration,
}

impl AlertRule {
    pub fn new(
        parameter: TelemetryParameter,
        comparator: Comparator,
        threshold: f64,
        cooldown: Duration,
    ) -> Self {
        Self {
            parameter,
            comparator,
            threshold,
            cooldown,
        }
    }

    /// Build a rule from its config-file form.
    pub fn from_config(config: &AlertRuleConfig) -> Result<Self> {
        Ok(Self {
            parameter: TelemetryParameter::parse(&config.parameter)?,
            comparator: Comparator::parse(&config.comparator)?,
            threshold: config.threshold,
            cooldown: Duration::from_secs(config.cooldown_secs),
        })
    }
}
