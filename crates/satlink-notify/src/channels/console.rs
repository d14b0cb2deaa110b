//! Console notification channel.

use async_trait::async_trait;

use satlink_core::AlertEvent;

use super::NotificationSink;
use crate::error::{NotifyError, Result};

/// Prints alerts to the operator console via the log stream.
#[derive(Debug, Clone)]
pub struct ConsoleChannel {
    name: String,
    enabled: bool,
}

impl ConsoleChannel {
    pub fn new(name: String) -> Self {
        Self {
            name,
            enabled: true,
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Self {
        Self {
            name: super::config_str(config, "name").unwrap_or_else(|| "console".to_string()),
            enabled: super::config_enabled(config),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[async_trait]
impl NotificationSink for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "console"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        if !self.enabled {
            return Err(NotifyError::ChannelDisabled(self.name.clone()));
        }
        tracing::warn!(
            parameter = %event.parameter,
            value = event.value,
            threshold = event.threshold,
            comparator = %event.comparator,
            triggered_at = %event.triggered_at,
            "ALERT"
        );
        Ok(())
    }
}
