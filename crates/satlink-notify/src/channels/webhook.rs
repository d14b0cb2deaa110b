//! Webhook notification channel.

use std::collections::HashMap;

use async_trait::async_trait;

use satlink_core::AlertEvent;

use super::NotificationSink;
use crate::error::{NotifyError, Result};

/// POSTs alerts as JSON to an operator-supplied URL.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    enabled: bool,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: String, url: String) -> Self {
        Self {
            name,
            enabled: true,
            url,
            headers: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let url = super::config_str(config, "url")
            .ok_or_else(|| NotifyError::InvalidConfiguration("webhook without url".to_string()))?;
        let mut channel = Self::new(
            super::config_str(config, "name").unwrap_or_else(|| "webhook".to_string()),
            url,
        );
        channel.enabled = super::config_enabled(config);
        if let Some(headers) = config.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    channel.headers.insert(key.clone(), value.to_string());
                }
            }
        }
        Ok(channel)
    }

    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.headers.insert(key, value);
        self
    }
}

#[async_trait]
impl NotificationSink for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        if !self.enabled {
            return Err(NotifyError::ChannelDisabled(self.name.clone()));
        }

        let mut request = self.client.post(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::SendFailed(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
