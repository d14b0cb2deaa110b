//! Notification channels.

pub mod console;
pub mod memory;

#[cfg(feature = "webhook")]
pub mod webhook;

#[cfg(feature = "email")]
pub mod email;

use std::sync::Arc;

use async_trait::async_trait;

use satlink_core::AlertEvent;

use crate::error::{NotifyError, Result};

/// A delivery channel for alert events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Unique channel name.
    fn name(&self) -> &str;

    /// Channel type identifier (`console`, `memory`, `webhook`, `email`).
    fn channel_type(&self) -> &str;

    /// Whether this channel should receive alerts.
    fn is_enabled(&self) -> bool;

    /// Deliver one alert event.
    async fn notify(&self, event: &AlertEvent) -> Result<()>;
}

/// Fan-out over all configured channels.
///
/// `dispatch` is best-effort: each enabled channel is tried, failures are
/// logged, and the call always succeeds.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from channel configs (`notify.channels` in the
    /// config file). Each entry needs a `type` field; the rest of the
    /// schema depends on the channel.
    pub fn from_configs(configs: &[serde_json::Value]) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(build_channel(config)?);
        }
        Ok(registry)
    }

    pub fn register(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver an event to every enabled channel, best-effort.
    pub async fn dispatch(&self, event: &AlertEvent) {
        for sink in &self.sinks {
            if !sink.is_enabled() {
                continue;
            }
            if let Err(e) = sink.notify(event).await {
                tracing::warn!(
                    channel = sink.name(),
                    channel_type = sink.channel_type(),
                    error = %e,
                    "alert notification failed"
                );
            }
        }
    }
}

fn build_channel(config: &serde_json::Value) -> Result<Arc<dyn NotificationSink>> {
    let channel_type = config
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| NotifyError::InvalidConfiguration("channel without type".to_string()))?;

    match channel_type {
        "console" => Ok(Arc::new(console::ConsoleChannel::from_config(config))),
        "memory" => Ok(Arc::new(memory::MemoryChannel::from_config(config))),
        #[cfg(feature = "webhook")]
        "webhook" => Ok(Arc::new(webhook::WebhookChannel::from_config(config)?)),
        #[cfg(feature = "email")]
        "email" => Ok(Arc::new(email::EmailChannel::from_config(config)?)),
        other => Err(NotifyError::InvalidConfiguration(format!(
            "unknown channel type: {}",
            other
        ))),
    }
}

pub(crate) fn config_str(config: &serde_json::Value, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub(crate) fn config_enabled(config: &serde_json::Value) -> bool {
    config
        .get("enabled")
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::memory::MemoryChannel;
    use chrono::Utc;

    fn event() -> AlertEvent {
        AlertEvent {
            id: uuid::Uuid::new_v4(),
            parameter: "snr_db".to_string(),
            value: 4.2,
            threshold: 10.0,
            comparator: "lt".to_string(),
            triggered_at: Utc::now(),
            acknowledged: false,
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_enabled_channels() {
        let recording = Arc::new(MemoryChannel::new("rec".to_string()));
        let disabled = Arc::new(MemoryChannel::disabled("off".to_string()));
        let mut registry = SinkRegistry::new();
        registry.register(recording.clone());
        registry.register(disabled.clone());

        registry.dispatch(&event()).await;

        assert_eq!(recording.count().await, 1);
        assert_eq!(disabled.count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_survives_failing_channel() {
        struct FailingSink;

        #[async_trait]
        impl NotificationSink for FailingSink {
            fn name(&self) -> &str {
                "broken"
            }
            fn channel_type(&self) -> &str {
                "test"
            }
            fn is_enabled(&self) -> bool {
                true
            }
            async fn notify(&self, _event: &AlertEvent) -> Result<()> {
                Err(NotifyError::SendFailed("down".to_string()))
            }
        }

        let recording = Arc::new(MemoryChannel::new("rec".to_string()));
        let mut registry = SinkRegistry::new();
        registry.register(Arc::new(FailingSink));
        registry.register(recording.clone());

        // Does not error, and later channels still get the event.
        registry.dispatch(&event()).await;
        assert_eq!(recording.count().await, 1);
    }

    #[test]
    fn test_from_configs_rejects_unknown_type() {
        let configs = vec![serde_json::json!({"type": "carrier-pigeon"})];
        assert!(SinkRegistry::from_configs(&configs).is_err());
    }

    #[test]
    fn test_from_configs_builds_console_and_memory() {
        let configs = vec![
            serde_json::json!({"type": "console"}),
            serde_json::json!({"type": "memory", "name": "stub"}),
        ];
        let registry = SinkRegistry::from_configs(&configs).unwrap();
        assert_eq!(registry.len(), 2);
    }
}
