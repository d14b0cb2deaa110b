//! External gateways: the satellite-broadcast order API and the Lightning
//! payer.
//!
//! Both are opaque external services reached over their own connections;
//! the orchestrator holds no lock across a gateway call.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use satlink_core::Invoice;

use crate::error::GatewayError;

/// Result of submitting a file to the broadcast network.
#[derive(Debug, Clone)]
pub struct SubmissionReceipt {
    /// Invoice to settle before the broadcast proceeds.
    pub invoice: Invoice,
    /// Network-side message identifier for status polling.
    pub network_message_id: String,
    /// Token authorizing status reads for this order.
    pub auth_token: String,
}

/// Transmission status as reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmissionStatus {
    /// Accepted, waiting (typically on payment confirmation).
    Pending,
    /// On the air.
    Transmitting,
    /// Terminal success.
    Completed,
    /// Terminal failure (cancelled or expired network-side).
    Failed,
}

/// Opaque handle for polling one payment.
#[derive(Debug, Clone)]
pub struct PaymentHandle {
    /// BOLT-11 payment request being settled.
    pub payreq: String,
}

/// Payment settlement status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

/// The satellite-broadcast submission/status API.
#[async_trait]
pub trait BroadcastNetworkGateway: Send + Sync {
    /// Submit a file and bid; returns the invoice and message id.
    async fn submit(
        &self,
        file_path: &str,
        bid_msat: u64,
    ) -> std::result::Result<SubmissionReceipt, GatewayError>;

    /// Poll transmission status for a submitted message.
    async fn poll_status(
        &self,
        network_message_id: &str,
        auth_token: Option<&str>,
    ) -> std::result::Result<TransmissionStatus, GatewayError>;
}

/// The Lightning payment capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start settling an invoice. Settlement is asynchronous; the returned
    /// handle is polled for the outcome.
    async fn pay(&self, invoice: &Invoice) -> std::result::Result<PaymentHandle, GatewayError>;

    /// Poll settlement status.
    async fn poll(
        &self,
        handle: &PaymentHandle,
    ) -> std::result::Result<PaymentStatus, GatewayError>;
}

/// HTTP gateway for a Blockstream-Satellite-style order API.
///
/// `POST {base}/order` with a multipart bid + file places the order and
/// returns a Lightning invoice; `GET {base}/order/{id}` with an
/// `X-Auth-Token` header reports its status.
pub struct HttpBroadcastGateway {
    base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    uuid: String,
    auth_token: String,
    lightning_invoice: LightningInvoice,
}

#[derive(Debug, Deserialize)]
struct LightningInvoice {
    payreq: String,
    #[serde(default)]
    msatoshi: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OrderStatus {
    status: String,
}

impl HttpBroadcastGateway {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn map_status(status: &str) -> TransmissionStatus {
        match status {
            "transmitting" => TransmissionStatus::Transmitting,
            "sent" | "received" => TransmissionStatus::Completed,
            "cancelled" | "expired" => TransmissionStatus::Failed,
            // "pending", "paid", "queued", anything new: keep waiting.
            _ => TransmissionStatus::Pending,
        }
    }
}

#[async_trait]
impl BroadcastNetworkGateway for HttpBroadcastGateway {
    async fn submit(
        &self,
        file_path: &str,
        bid_msat: u64,
    ) -> std::result::Result<SubmissionReceipt, GatewayError> {
        let data = tokio::fs::read(file_path).await?;
        let file_name = Path::new(file_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "payload".to_string());

        let form = reqwest::multipart::Form::new()
            .text("bid", bid_msat.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(data).file_name(file_name),
            );

        let response = self
            .client
            .post(format!("{}/order", self.base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{}: {}", status, body)));
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        debug!(order = %order.uuid, "broadcast order placed");

        Ok(SubmissionReceipt {
            invoice: Invoice {
                payreq: order.lightning_invoice.payreq,
                amount_msat: order.lightning_invoice.msatoshi.unwrap_or(bid_msat),
            },
            network_message_id: order.uuid,
            auth_token: order.auth_token,
        })
    }

    async fn poll_status(
        &self,
        network_message_id: &str,
        auth_token: Option<&str>,
    ) -> std::result::Result<TransmissionStatus, GatewayError> {
        let mut request = self
            .client
            .get(format!("{}/order/{}", self.base, network_message_id));
        if let Some(token) = auth_token {
            request = request.header("X-Auth-Token", token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::Http(format!(
                "status poll returned {}",
                response.status()
            )));
        }
        let order: OrderStatus = response
            .json()
            .await
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;
        Ok(Self::map_status(&order.status))
    }
}

/// Payment gateway driving a local Core Lightning node through its CLI.
///
/// `pay` launches `lightning-cli pay <bolt11>` detached; settlement is
/// observed through `lightning-cli listpays <bolt11>`.
pub struct LightningCliGateway {
    cli_path: String,
}

#[derive(Debug, Deserialize)]
struct ListPays {
    #[serde(default)]
    pays: Vec<PayEntry>,
}

#[derive(Debug, Deserialize)]
struct PayEntry {
    status: String,
}

impl LightningCliGateway {
    pub fn new(cli_path: impl Into<String>) -> Self {
        Self {
            cli_path: cli_path.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for LightningCliGateway {
    async fn pay(&self, invoice: &Invoice) -> std::result::Result<PaymentHandle, GatewayError> {
        // pay blocks until the payment resolves; run it detached and watch
        // the outcome through listpays.
        let child = Command::new(&self.cli_path)
            .arg("pay")
            .arg(&invoice.payreq)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| GatewayError::Payer(format!("spawn {}: {}", self.cli_path, e)))?;
        drop(child);

        Ok(PaymentHandle {
            payreq: invoice.payreq.clone(),
        })
    }

    async fn poll(
        &self,
        handle: &PaymentHandle,
    ) -> std::result::Result<PaymentStatus, GatewayError> {
        let output = Command::new(&self.cli_path)
            .arg("listpays")
            .arg(&handle.payreq)
            .output()
            .await
            .map_err(|e| GatewayError::Payer(e.to_string()))?;
        if !output.status.success() {
            return Err(GatewayError::Payer(format!(
                "listpays exited with {}",
                output.status
            )));
        }
        let list: ListPays = serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::BadResponse(e.to_string()))?;

        match list.pays.first().map(|p| p.status.as_str()) {
            Some("complete") => Ok(PaymentStatus::Paid),
            Some("failed") => Ok(PaymentStatus::Failed),
            Some(_) => Ok(PaymentStatus::Pending),
            // Not registered yet: the pay process may still be starting.
            None => {
                warn!("payment not yet known to the node");
                Ok(PaymentStatus::Pending)
            }
        }
    }
}
