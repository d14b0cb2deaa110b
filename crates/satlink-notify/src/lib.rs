//! Notification sinks for alert delivery.
//!
//! Alert delivery is best-effort and fire-and-forget: a failing channel is
//! logged and never blocks alert evaluation or persistence.

pub mod channels;
pub mod error;

pub use channels::{NotificationSink, SinkRegistry};
pub use error::{NotifyError, Result};

#[cfg(feature = "webhook")]
pub use channels::webhook::WebhookChannel;

#[cfg(feature = "email")]
pub use channels::email::EmailChannel;

pub use channels::console::ConsoleChannel;
pub use channels::memory::MemoryChannel;
