//! In-memory notification channel (recording stub for tests).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use satlink_core::AlertEvent;

use super::NotificationSink;
use crate::error::{NotifyError, Result};

/// Records delivered alerts instead of sending them anywhere.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    name: String,
    enabled: bool,
    events: Arc<Mutex<Vec<AlertEvent>>>,
}

impl MemoryChannel {
    pub fn new(name: String) -> Self {
        Self {
            name,
            enabled: true,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn disabled(name: String) -> Self {
        Self {
            name,
            enabled: false,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Self {
        let name = super::config_str(config, "name").unwrap_or_else(|| "memory".to_string());
        if super::config_enabled(config) {
            Self::new(name)
        } else {
            Self::disabled(name)
        }
    }

    pub async fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl NotificationSink for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "memory"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        if !self.enabled {
            return Err(NotifyError::ChannelDisabled(self.name.clone()));
        }
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
