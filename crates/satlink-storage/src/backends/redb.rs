//! redb storage backend.
//!
//! One unified table keyed by namespaced strings:
//!
//! - `telemetry:{nanos:020}:{seq:010}` → bincode [`TelemetryReading`]
//! - `alerts:{nanos:020}:{seq:010}` → bincode [`AlertEvent`]
//! - `broadcasts:{created_nanos:020}:{id}` → bincode [`BroadcastRecord`]
//!
//! Zero-padded timestamps make lexicographic key order equal to time order,
//! so range queries are plain key ranges.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use satlink_core::{AlertEvent, BroadcastRecord, TelemetryReading};

use crate::error::{Result, StorageError};
use crate::TelemetryStore;

const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("satlink");

const TELEMETRY_PREFIX: &str = "telemetry:";
const TELEMETRY_END: &str = "telemetry;";
const ALERTS_PREFIX: &str = "alerts:";
const ALERTS_END: &str = "alerts;";
const BROADCASTS_PREFIX: &str = "broadcasts:";
const BROADCASTS_END: &str = "broadcasts;";

fn backend<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn codec<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Codec(e.to_string())
}

fn key_nanos(timestamp: DateTime<Utc>) -> u64 {
    timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX).max(0) as u64
}

/// redb-backed telemetry store.
pub struct RedbStore {
    db: Arc<Database>,
    /// Disambiguates rows sharing a timestamp.
    seq: AtomicU64,
}

impl RedbStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path).map_err(backend)?
        } else {
            Database::create(path).map_err(backend)?
        };

        // Make sure the table exists so reads before the first write work.
        let txn = db.begin_write().map_err(backend)?;
        txn.open_table(UNIFIED_TABLE).map_err(backend)?;
        txn.commit().map_err(backend)?;

        Ok(Self {
            db: Arc::new(db),
            seq: AtomicU64::new(0),
        })
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(UNIFIED_TABLE).map_err(backend)?;
            table.insert(key, value).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(UNIFIED_TABLE).map_err(backend)?;
        Ok(table.get(key).map_err(backend)?.is_some())
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, start: &str, end: &str) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(UNIFIED_TABLE).map_err(backend)?;
        let mut rows = Vec::new();
        for item in table.range(start..end).map_err(backend)? {
            let (_, value) = item.map_err(backend)?;
            rows.push(bincode::deserialize(value.value()).map_err(codec)?);
        }
        Ok(rows)
    }

    fn scan_rev<T: serde::de::DeserializeOwned>(
        &self,
        start: &str,
        end: &str,
        limit: usize,
    ) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(backend)?;
        let table = txn.open_table(UNIFIED_TABLE).map_err(backend)?;
        let mut rows = Vec::new();
        for item in table.range(start..end).map_err(backend)?.rev().take(limit) {
            let (_, value) = item.map_err(backend)?;
            rows.push(bincode::deserialize(value.value()).map_err(codec)?);
        }
        Ok(rows)
    }

    fn broadcast_key(record: &BroadcastRecord) -> String {
        format!(
            "{}{:020}:{}",
            BROADCASTS_PREFIX,
            key_nanos(record.created_at),
            record.id
        )
    }

    fn timed_key(&self, prefix: &str, timestamp: DateTime<Utc>) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}{:020}:{:010}", prefix, key_nanos(timestamp), seq)
    }
}

#[async_trait]
impl TelemetryStore for RedbStore {
    async fn append_reading(&self, reading: &TelemetryReading) -> Result<()> {
        let key = self.timed_key(TELEMETRY_PREFIX, reading.timestamp);
        let value = bincode::serialize(reading).map_err(codec)?;
        self.put(&key, &value)
    }

    async fn query_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TelemetryReading>> {
        let start_key = format!("{}{:020}:{:010}", TELEMETRY_PREFIX, key_nanos(start), 0);
        let end_key = format!("{}{:020}:{:010}", TELEMETRY_PREFIX, key_nanos(end), 0);
        self.scan(&start_key, &end_key)
    }

    async fn latest_reading(&self) -> Result<Option<TelemetryReading>> {
        Ok(self
            .scan_rev(TELEMETRY_PREFIX, TELEMETRY_END, 1)?
            .into_iter()
            .next())
    }

    async fn append_alert(&self, event: &AlertEvent) -> Result<()> {
        let key = self.timed_key(ALERTS_PREFIX, event.triggered_at);
        let value = bincode::serialize(event).map_err(codec)?;
        self.put(&key, &value)
    }

    async fn alert_history(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        self.scan_rev(ALERTS_PREFIX, ALERTS_END, limit)
    }

    async fn append_broadcast(&self, record: &BroadcastRecord) -> Result<()> {
        let value = bincode::serialize(record).map_err(codec)?;
        self.put(&Self::broadcast_key(record), &value)
    }

    async fn update_broadcast(&self, record: &BroadcastRecord) -> Result<()> {
        let key = Self::broadcast_key(record);
        if !self.contains(&key)? {
            return Err(StorageError::NotFound(format!(
                "broadcast record {}",
                record.id
            )));
        }
        let value = bincode::serialize(record).map_err(codec)?;
        self.put(&key, &value)
    }

    async fn broadcast_history(&self) -> Result<Vec<BroadcastRecord>> {
        self.scan(BROADCASTS_PREFIX, BROADCASTS_END)
    }
}
