//! In-memory store for tests and degraded-mode fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use satlink_core::{AlertEvent, BroadcastId, BroadcastRecord, TelemetryReading};

use crate::error::{Result, StorageError};
use crate::TelemetryStore;

/// Volatile telemetry store.
#[derive(Default)]
pub struct MemoryStore {
    readings: RwLock<Vec<TelemetryReading>>,
    alerts: RwLock<Vec<AlertEvent>>,
    broadcasts: RwLock<(Vec<BroadcastId>, HashMap<BroadcastId, BroadcastRecord>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn append_reading(&self, reading: &TelemetryReading) -> Result<()> {
        self.readings.write().await.push(reading.clone());
        Ok(())
    }

    async fn query_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryReading>> {
        let mut rows: Vec<TelemetryReading> = self
            .readings
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp < end)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn latest_reading(&self) -> Result<Option<TelemetryReading>> {
        Ok(self
            .readings
            .read()
            .await
            .iter()
            .max_by_key(|r| r.timestamp)
            .cloned())
    }

    async fn append_alert(&self, event: &AlertEvent) -> Result<()> {
        self.alerts.write().await.push(event.clone());
        Ok(())
    }

    async fn alert_history(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let alerts = self.alerts.read().await;
        Ok(alerts.iter().rev().take(limit).cloned().collect())
    }

    async fn append_broadcast(&self, record: &BroadcastRecord) -> Result<()> {
        let mut broadcasts = self.broadcasts.write().await;
        if broadcasts.1.insert(record.id, record.clone()).is_none() {
            broadcasts.0.push(record.id);
        }
        Ok(())
    }

    async fn update_broadcast(&self, record: &BroadcastRecord) -> Result<()> {
        let mut broadcasts = self.broadcasts.write().await;
        match broadcasts.1.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!(
                "broadcast record {}",
                record.id
            ))),
        }
    }

    async fn broadcast_history(&self) -> Result<Vec<BroadcastRecord>> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts
            .0
            .iter()
            .filter_map(|id| broadcasts.1.get(id).cloned())
            .collect())
    }
}
