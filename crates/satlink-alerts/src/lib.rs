//! Threshold alerting over the telemetry stream.
//!
//! The evaluator is a pure function of the current reading, the rule set,
//! and explicit per-rule edge/cooldown state, so it is deterministic under
//! test. The service wraps it in a bus-consuming worker that fans produced
//! events out to persistence and notification.

pub mod error;
pub mod evaluator;
pub mod rule;
pub mod service;

pub use error::{AlertError, Result};
pub use evaluator::{AlertEvaluator, RuleState};
pub use rule::{AlertRule, Comparator, TelemetryParameter};
pub use service::AlertService;
