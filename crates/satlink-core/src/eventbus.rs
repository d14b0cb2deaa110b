//! Telemetry event bus.
//!
//! A single producer (the link session) publishes [`LinkEvent`]s; any number
//! of workers (persistence, alert evaluation, the query surface) subscribe.
//! The channel is ordered and bounded: when a consumer falls behind the
//! capacity, the oldest unconsumed events are dropped and counted rather
//! than blocking the link receive loop. Telemetry is sampled data, not
//! command-critical.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::event::LinkEvent;

/// Default bounded capacity of the bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Ordered single-producer/multi-consumer event bus with drop accounting.
#[derive(Clone)]
pub struct TelemetryBus {
    tx: broadcast::Sender<LinkEvent>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with the given bounded capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns `true` if at least one subscriber existed. Publishing never
    /// blocks; a full buffer evicts the oldest event on the lagging
    /// subscriber side instead.
    pub fn publish(&self, event: LinkEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Subscribe to all events from this point on.
    pub fn subscribe(&self) -> TelemetryBusReceiver {
        TelemetryBusReceiver {
            rx: self.tx.subscribe(),
            dropped: self.dropped.clone(),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events dropped across all lagging subscribers.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the bus.
pub struct TelemetryBusReceiver {
    rx: broadcast::Receiver<LinkEvent>,
    dropped: Arc<AtomicU64>,
}

impl TelemetryBusReceiver {
    /// Receive the next event in order.
    ///
    /// If this subscriber lagged, the missed events are counted in the bus
    /// drop metric and reception continues with the oldest retained event.
    /// Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                    tracing::warn!(missed, "telemetry bus subscriber lagged, dropping oldest");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive without waiting.
    pub fn try_recv(&mut self) -> Option<LinkEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    self.dropped.fetch_add(missed, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }
}
