//! Alert worker: consumes the telemetry bus, evaluates rules, and fans
//! produced events out to persistence and notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use satlink_core::{LinkEvent, TelemetryBusReceiver};
use satlink_notify::SinkRegistry;
use satlink_storage::TelemetryStore;

use crate::evaluator::AlertEvaluator;
use crate::rule::AlertRule;

/// Background alert evaluation service.
///
/// Runs off the event bus so evaluation never blocks the link receive
/// loop. Persistence failures are logged and counted as a degraded-storage
/// signal; notification failures are logged only. Neither stops the
/// worker.
pub struct AlertService {
    task: JoinHandle<()>,
    persist_failures: Arc<AtomicU64>,
}

impl AlertService {
    /// Spawn the worker on the given bus subscription.
    pub fn spawn(
        mut events: TelemetryBusReceiver,
        rules: Vec<AlertRule>,
        store: Arc<dyn TelemetryStore>,
        sinks: Arc<SinkRegistry>,
    ) -> Self {
        let persist_failures = Arc::new(AtomicU64::new(0));
        let failures = persist_failures.clone();

        let task = tokio::spawn(async move {
            let mut evaluator = AlertEvaluator::new(rules);
            info!(rules = evaluator.rules().len(), "alert service started");
            while let Some(event) = events.recv().await {
                let LinkEvent::Telemetry(reading) = event else {
                    continue;
                };
                for alert in evaluator.evaluate(&reading, Utc::now()) {
                    if let Err(e) = store.append_alert(&alert).await {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "alert persistence failed, continuing in degraded mode");
                    }
                    sinks.dispatch(&alert).await;
                }
            }
            info!("alert service stopped");
        });

        Self {
            task,
            persist_failures,
        }
    }

    /// Alert rows lost to storage failures since startup.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
