//! Telemetry store gateway.
//!
//! Durable append/query of telemetry rows, alert events, and broadcast
//! records behind one narrow trait. The engine talks only to
//! [`TelemetryStore`]; backends are interchangeable (redb on disk,
//! in-memory for tests and degraded-mode fallback).

pub mod backends;
pub mod error;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use satlink_core::{AlertEvent, BroadcastRecord, TelemetryReading};

pub use backends::memory::MemoryStore;
pub use backends::redb::RedbStore;
pub use error::{Result, StorageError};

/// Durable store for telemetry history and broadcast records.
///
/// Append calls are expected to commit before returning; the broadcast
/// orchestrator relies on that to survive restarts.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Append one telemetry reading. Readings are immutable.
    async fn append_reading(&self, reading: &TelemetryReading) -> Result<()>;

    /// Readings with `start <= timestamp < end`, in timestamp order.
    async fn query_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryReading>>;

    /// The most recently appended reading.
    async fn latest_reading(&self) -> Result<Option<TelemetryReading>>;

    /// Append one alert event.
    async fn append_alert(&self, event: &AlertEvent) -> Result<()>;

    /// The most recent alert events, newest first, at most `limit`.
    async fn alert_history(&self, limit: usize) -> Result<Vec<AlertEvent>>;

    /// Persist a new broadcast record.
    async fn append_broadcast(&self, record: &BroadcastRecord) -> Result<()>;

    /// Overwrite an existing broadcast record.
    async fn update_broadcast(&self, record: &BroadcastRecord) -> Result<()>;

    /// All broadcast records, oldest first.
    async fn broadcast_history(&self) -> Result<Vec<BroadcastRecord>>;

    /// Broadcast records in a non-terminal state, for restart resume.
    async fn inflight_broadcasts(&self) -> Result<Vec<BroadcastRecord>> {
        Ok(self
            .broadcast_history()
            .await?
            .into_iter()
            .filter(|record| !record.state.is_terminal())
            .collect())
    }
}
