//! Threshold evaluation with per-rule cooldown and edge tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use satlink_core::{AlertEvent, TelemetryReading};

use crate::rule::AlertRule;

/// Per-rule evaluation state.
///
/// Kept in an owned map rather than global state so multiple links and rule
/// sets evaluate independently and deterministically.
#[derive(Debug, Clone, Default)]
pub struct RuleState {
    /// When this rule last produced an event.
    pub last_triggered: Option<DateTime<Utc>>,
    /// Whether the previous reading violated the rule (edge tracking).
    pub last_violated: bool,
}

/// Evaluates readings against the rule set.
pub struct AlertEvaluator {
    rules: Vec<AlertRule>,
    states: HashMap<usize, RuleState>,
}

impl AlertEvaluator {
    pub fn new(rules: Vec<AlertRule>) -> Self {
        Self {
            rules,
            states: HashMap::new(),
        }
    }

    /// Replace the rule set; evaluation state starts over.
    pub fn update_rules(&mut self, rules: Vec<AlertRule>) {
        self.rules = rules;
        self.states.clear();
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Evaluate one reading at time `now`.
    ///
    /// A rule produces an event when it is violated and its cooldown has
    /// elapsed since the last event, so a continuously-violated parameter
    /// yields exactly one event per cooldown window, not one per reading.
    /// A falling edge only clears the edge flag; the cooldown clock keeps
    /// running, so the next violation triggers as soon as the cooldown
    /// allows.
    pub fn evaluate(&mut self, reading: &TelemetryReading, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let value = rule.parameter.extract(reading);
            let violated = rule.comparator.compare(value, rule.threshold);
            let state = self.states.entry(index).or_default();

            if violated {
                let cooled = match state.last_triggered {
                    None => true,
                    Some(last) => now
                        .signed_duration_since(last)
                        .to_std()
                        .map(|elapsed| elapsed >= rule.cooldown)
                        .unwrap_or(false),
                };
                if cooled {
                    state.last_triggered = Some(now);
                    if !state.last_violated {
                        tracing::debug!(
                            parameter = %rule.parameter,
                            value,
                            threshold = rule.threshold,
                            "rising-edge violation"
                        );
                    }
                    events.push(AlertEvent {
                        id: Uuid::new_v4(),
                        parameter: rule.parameter.as_str().to_string(),
                        value,
                        threshold: rule.threshold,
                        comparator: rule.comparator.as_str().to_string(),
                        triggered_at: now,
                        acknowledged: false,
                    });
                }
            }
            state.last_violated = violated;
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Comparator, TelemetryParameter};
    use chrono::TimeZone;
    use std::time::Duration;

    fn reading(snr_db: f32) -> TelemetryReading {
        TelemetryReading {
            timestamp: Utc::now(),
            signal_strength: 0.8,
            snr_db,
            ber: 1e-6,
            temperature_c: 20.0,
            packets_sent: 1,
            packets_received: 1,
            link_id: "sat-0".to_string(),
        }
    }

    fn low_snr_rule(cooldown_secs: u64) -> AlertRule {
        AlertRule::new(
            TelemetryParameter::SnrDb,
            Comparator::LessThan,
            10.0,
            Duration::from_secs(cooldown_secs),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_no_event_when_within_threshold() {
        let mut evaluator = AlertEvaluator::new(vec![low_snr_rule(10)]);
        assert!(evaluator.evaluate(&reading(25.0), at(0)).is_empty());
    }

    #[test]
    fn test_continuous_violation_one_event_per_cooldown_window() {
        let mut evaluator = AlertEvaluator::new(vec![low_snr_rule(10)]);

        // Violated on every reading, one per second for 25 seconds.
        let mut produced = 0;
        for secs in 0..=25 {
            produced += evaluator.evaluate(&reading(2.0), at(secs)).len();
        }
        // floor(25 / 10) + 1 events, not 26.
        assert_eq!(produced, 3);
    }

    #[test]
    fn test_falling_edge_does_not_bypass_cooldown() {
        let mut evaluator = AlertEvaluator::new(vec![low_snr_rule(10)]);

        assert_eq!(evaluator.evaluate(&reading(2.0), at(0)).len(), 1);
        // Recovers, then violates again inside the cooldown: no event.
        assert!(evaluator.evaluate(&reading(25.0), at(2)).is_empty());
        assert!(evaluator.evaluate(&reading(2.0), at(3)).is_empty());
        // Past the cooldown the next violation triggers immediately.
        assert_eq!(evaluator.evaluate(&reading(2.0), at(10)).len(), 1);
    }

    #[test]
    fn test_rules_evaluate_independently() {
        let hot_rule = AlertRule::new(
            TelemetryParameter::TemperatureC,
            Comparator::GreaterThan,
            60.0,
            Duration::from_secs(10),
        );
        let mut evaluator = AlertEvaluator::new(vec![low_snr_rule(10), hot_rule]);

        let mut sample = reading(2.0);
        sample.temperature_c = 75.0;
        let events = evaluator.evaluate(&sample, at(0));
        assert_eq!(events.len(), 2);
        let parameters: Vec<&str> = events.iter().map(|e| e.parameter.as_str()).collect();
        assert!(parameters.contains(&"snr_db"));
        assert!(parameters.contains(&"temperature_c"));
    }

    #[test]
    fn test_event_carries_observed_value() {
        let mut evaluator = AlertEvaluator::new(vec![low_snr_rule(10)]);
        let events = evaluator.evaluate(&reading(3.5), at(0));
        assert_eq!(events.len(), 1);
        assert!((events[0].value - 3.5).abs() < 1e-6);
        assert_eq!(events[0].threshold, 10.0);
        assert_eq!(events[0].comparator, "lt");
        assert!(!events[0].acknowledged);
    }

    #[test]
    fn test_update_rules_resets_state() {
        let mut evaluator = AlertEvaluator::new(vec![low_snr_rule(1000)]);
        assert_eq!(evaluator.evaluate(&reading(2.0), at(0)).len(), 1);
        evaluator.update_rules(vec![low_snr_rule(1000)]);
        // Fresh state: fires again without waiting out the old cooldown.
        assert_eq!(evaluator.evaluate(&reading(2.0), at(1)).len(), 1);
    }
}
