//! Email notification channel.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use satlink_core::AlertEvent;

use super::NotificationSink;
use crate::error::{NotifyError, Result};

/// Sends alerts by SMTP.
#[derive(Debug, Clone)]
pub struct EmailChannel {
    name: String,
    enabled: bool,
    smtp_server: String,
    smtp_port: u16,
    username: String,
    password: String,
    from_address: String,
    to_addresses: Vec<String>,
}

impl EmailChannel {
    pub fn new(
        name: String,
        smtp_server: String,
        smtp_port: u16,
        username: String,
        password: String,
        from_address: String,
    ) -> Self {
        Self {
            name,
            enabled: true,
            smtp_server,
            smtp_port,
            username,
            password,
            from_address,
            to_addresses: Vec::new(),
        }
    }

    pub fn with_recipients(mut self, addresses: Vec<String>) -> Self {
        self.to_addresses = addresses;
        self
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let field = |key: &str| {
            super::config_str(config, key).ok_or_else(|| {
                NotifyError::InvalidConfiguration(format!("email channel missing {}", key))
            })
        };
        let port = config
            .get("smtp_port")
            .and_then(|v| v.as_u64())
            .unwrap_or(587) as u16;
        let recipients = config
            .get("recipients")
            .and_then(|v| v.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut channel = Self::new(
            super::config_str(config, "name").unwrap_or_else(|| "email".to_string()),
            field("smtp_server")?,
            port,
            field("username")?,
            field("password")?,
            field("from_address")?,
        )
        .with_recipients(recipients);
        channel.enabled = super::config_enabled(config);
        Ok(channel)
    }

    fn body(event: &AlertEvent) -> String {
        format!(
            "Telemetry alert\n\n\
             parameter: {}\n\
             observed:  {}\n\
             threshold: {} ({})\n\
             time:      {}\n",
            event.parameter,
            event.value,
            event.threshold,
            event.comparator,
            event.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

#[async_trait]
impl NotificationSink for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn notify(&self, event: &AlertEvent) -> Result<()> {
        if !self.enabled {
            return Err(NotifyError::ChannelDisabled(self.name.clone()));
        }
        if self.to_addresses.is_empty() {
            return Err(NotifyError::SendFailed("no recipients configured".to_string()));
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.smtp_server)
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?
            .port(self.smtp_port)
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.clone(),
            ))
            .build();

        let subject = format!("[satlink] {} alert", event.parameter);
        let body = Self::body(event);

        for to in &self.to_addresses {
            let message = Message::builder()
                .from(
                    self.from_address
                        .parse()
                        .map_err(|e| NotifyError::SendFailed(format!("bad from address: {}", e)))?,
                )
                .to(to
                    .parse()
                    .map_err(|e| NotifyError::SendFailed(format!("bad recipient: {}", e)))?)
                .subject(&subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())
                .map_err(|e| NotifyError::SendFailed(e.to_string()))?;

            transport
                .send(message)
                .await
                .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_smtp_fields() {
        let config = serde_json::json!({"type": "email", "smtp_server": "smtp.example.com"});
        assert!(EmailChannel::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_full() {
        let config = serde_json::json!({
            "type": "email",
            "smtp_server": "smtp.example.com",
            "smtp_port": 465,
            "username": "ops",
            "password": "secret",
            "from_address": "satlink@example.com",
            "recipients": ["oncall@example.com"]
        });
        let channel = EmailChannel::from_config(&config).unwrap();
        assert_eq!(channel.smtp_port, 465);
        assert_eq!(channel.to_addresses.len(), 1);
    }
}
