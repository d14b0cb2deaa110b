//! Engine wiring and the dashboard-facing query surface.
//!
//! `App` owns the link session, the bus workers, and the broadcast
//! orchestrator; the dashboard layer (or the CLI) only ever calls its
//! query and command methods.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use satlink_alerts::{AlertRule, AlertService};
use satlink_broadcast::{
    BroadcastOrchestrator, HttpBroadcastGateway, LightningCliGateway,
};
use satlink_core::{
    AlertEvent, BroadcastId, BroadcastRecord, Command, CommandKind, LinkEvent, LinkHealth,
    SatlinkConfig, TelemetryBus, TelemetryReading,
};
use satlink_link::LinkSession;
use satlink_notify::SinkRegistry;
use satlink_storage::{RedbStore, TelemetryStore};

/// The running engine.
pub struct App {
    bus: TelemetryBus,
    session: LinkSession,
    alerts: AlertService,
    orchestrator: BroadcastOrchestrator,
    store: Arc<dyn TelemetryStore>,
    persist_task: JoinHandle<()>,
    persist_failures: Arc<AtomicU64>,
}

impl App {
    /// Start the engine with the redb store from the config.
    pub async fn start(config: SatlinkConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn TelemetryStore> = Arc::new(
            RedbStore::open(&config.storage.path)
                .with_context(|| format!("opening store at {}", config.storage.path))?,
        );
        Self::start_with_store(config, store).await
    }

    /// Start the engine against an arbitrary store (tests).
    pub async fn start_with_store(
        config: SatlinkConfig,
        store: Arc<dyn TelemetryStore>,
    ) -> anyhow::Result<Self> {
        let bus = TelemetryBus::with_capacity(config.link.bus_capacity);

        let rules = config
            .alerts
            .iter()
            .map(AlertRule::from_config)
            .collect::<Result<Vec<_>, _>>()
            .context("parsing alert rules")?;
        let sinks = Arc::new(
            SinkRegistry::from_configs(&config.notify.channels)
                .context("building notification channels")?,
        );
        info!(
            rules = rules.len(),
            channels = sinks.len(),
            "alerting configured"
        );
        let alerts = AlertService::spawn(bus.subscribe(), rules, store.clone(), sinks);

        // Persistence worker: consumes the bus so appends never block the
        // link receive loop.
        let persist_failures = Arc::new(AtomicU64::new(0));
        let persist_task = {
            let mut events = bus.subscribe();
            let store = store.clone();
            let failures = persist_failures.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let LinkEvent::Telemetry(reading) = event else {
                        continue;
                    };
                    if let Err(e) = store.append_reading(&reading).await {
                        failures.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %e, "telemetry persistence failed, continuing in degraded mode");
                    }
                }
            })
        };

        let orchestrator = BroadcastOrchestrator::new(
            store.clone(),
            Arc::new(HttpBroadcastGateway::new(&config.broadcast.api_base)),
            Arc::new(LightningCliGateway::new(&config.broadcast.lightning_cli)),
            config.broadcast.clone(),
        );
        let resumed = orchestrator.resume().await?;
        if resumed > 0 {
            info!(resumed, "resumed in-flight broadcast requests");
        }

        let session = LinkSession::connect(config.link.clone(), bus.clone());

        Ok(Self {
            bus,
            session,
            alerts,
            orchestrator,
            store,
            persist_task,
            persist_failures,
        })
    }

    /// Current link health.
    pub async fn link_health(&self) -> LinkHealth {
        self.session.health().await
    }

    /// Most recent persisted telemetry reading.
    pub async fn latest_reading(&self) -> Option<TelemetryReading> {
        match self.store.latest_reading().await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(error = %e, "latest reading query failed");
                None
            }
        }
    }

    /// Telemetry rows in `start <= t < end`.
    pub async fn query_readings(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<TelemetryReading>> {
        Ok(self.store.query_readings(start, end).await?)
    }

    /// Most recent alert events, newest first.
    pub async fn alert_history(&self, limit: usize) -> anyhow::Result<Vec<AlertEvent>> {
        Ok(self.store.alert_history(limit).await?)
    }

    /// All broadcast requests, oldest first.
    pub async fn broadcast_history(&self) -> anyhow::Result<Vec<BroadcastRecord>> {
        Ok(self.orchestrator.history().await?)
    }

    /// Issue a command over the link and wait for its acknowledgment.
    pub async fn send_command(
        &self,
        kind: CommandKind,
        parameters: Vec<(String, String)>,
    ) -> satlink_link::Result<Command> {
        self.session.send_command(kind, parameters).await
    }

    /// Submit a file for broadcast.
    pub async fn submit_broadcast(
        &self,
        file_path: &str,
        bid_msat: u64,
    ) -> satlink_broadcast::Result<BroadcastId> {
        self.orchestrator.submit(file_path, bid_msat).await
    }

    /// Cancel a broadcast request that has not been paid yet.
    pub async fn cancel_broadcast(
        &self,
        id: BroadcastId,
    ) -> satlink_broadcast::Result<BroadcastRecord> {
        self.orchestrator.cancel(id).await
    }

    /// Ask the session to reconnect after it gave up.
    pub async fn reconnect(&self) -> satlink_link::Result<()> {
        self.session.reconnect().await
    }

    /// Telemetry events dropped because consumers lagged.
    pub fn telemetry_drop_count(&self) -> u64 {
        self.bus.dropped()
    }

    /// Whether any persistence write has failed since startup.
    pub fn storage_degraded(&self) -> bool {
        self.persist_failures.load(Ordering::Relaxed) + self.alerts.persist_failures() > 0
    }

    /// Stop workers and the link session.
    pub async fn shutdown(self) {
        self.session.shutdown().await;
        self.alerts.shutdown().await;
        self.persist_task.abort();
        let _ = self.persist_task.await;
        info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satlink_core::{
        AlertRuleConfig, BackoffConfig, BroadcastConfig, BroadcastState, LinkConfig, NotifyConfig,
        StorageConfig, TransportConfig,
    };
    use satlink_storage::MemoryStore;

    fn config() -> SatlinkConfig {
        SatlinkConfig {
            link: LinkConfig {
                link_id: "sat-test".to_string(),
                // Nothing listens here; the session stays degraded, which
                // must not stop the rest of the engine.
                transport: TransportConfig::Tcp {
                    host: "127.0.0.1".to_string(),
                    port: 1,
                },
                ack_timeout_secs: 1,
                backoff: BackoffConfig {
                    base_ms: 50,
                    cap_ms: 200,
                    max_attempts: 3,
                },
                frame_error_threshold: 8,
                frame_error_window_secs: 10,
                photo_timeout_secs: 60,
                bus_capacity: 64,
            },
            storage: StorageConfig {
                path: "unused".to_string(),
            },
            alerts: vec![AlertRuleConfig {
                parameter: "snr_db".to_string(),
                comparator: "lt".to_string(),
                threshold: 10.0,
                cooldown_secs: 60,
            }],
            notify: NotifyConfig {
                channels: vec![serde_json::json!({"type": "memory"})],
            },
            broadcast: BroadcastConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_engine_starts_and_serves_queries() {
        let app = App::start_with_store(config(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();

        assert!(app.latest_reading().await.is_none());
        assert!(app.alert_history(10).await.unwrap().is_empty());
        assert!(app.broadcast_history().await.unwrap().is_empty());
        assert_eq!(app.telemetry_drop_count(), 0);
        assert!(!app.storage_degraded());

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_of_missing_file_is_rejected_and_recorded() {
        let app = App::start_with_store(config(), Arc::new(MemoryStore::new()))
            .await
            .unwrap();

        let result = app
            .submit_broadcast("/nonexistent/payload.bin", 1_000)
            .await;
        assert!(matches!(
            result,
            Err(satlink_broadcast::BroadcastError::SubmissionRejected(_))
        ));

        let history = app.broadcast_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, BroadcastState::Failed);

        app.shutdown().await;
    }
}
