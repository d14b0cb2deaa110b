//! Broadcast orchestration: paid file transmission through an external
//! satellite-broadcast network.
//!
//! Each request runs a persisted state machine: submit the file and bid,
//! settle the returned Lightning invoice, then poll transmission status to
//! a terminal state. Financial steps are never retried automatically; a
//! failure is a terminal, inspectable state that requires explicit operator
//! resubmission.

pub mod error;
pub mod gateway;
pub mod orchestrator;

pub use error::{BroadcastError, GatewayError, Result};
pub use gateway::{
    BroadcastNetworkGateway, HttpBroadcastGateway, LightningCliGateway, PaymentGateway,
    PaymentHandle, PaymentStatus, SubmissionReceipt, TransmissionStatus,
};
pub use orchestrator::BroadcastOrchestrator;
