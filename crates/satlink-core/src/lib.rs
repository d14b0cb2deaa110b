//! Core types and abstractions for Satlink.
//!
//! This crate defines the domain types shared across the project: telemetry
//! readings, commands, link health, the telemetry event bus, and the
//! configuration tree loaded by the binary.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod types;

pub use broadcast::{
    BroadcastId, BroadcastRecord, BroadcastState, FailureReason, Invoice,
};
pub use config::{
    AlertRuleConfig, BackoffConfig, BroadcastConfig, LinkConfig, NotifyConfig, SatlinkConfig,
    StorageConfig, TransportConfig,
};
pub use error::{Error, Result};
pub use event::LinkEvent;
pub use eventbus::{TelemetryBus, TelemetryBusReceiver, DEFAULT_BUS_CAPACITY};
pub use types::{
    AlertEvent, Command, CommandId, CommandKind, CommandStatus, LinkHealth, LinkStatus,
    TelemetryReading,
};
