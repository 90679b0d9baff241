//! Threshold alerting engine
//!
//! Turns a stream of readings for one scope into gated alert decisions:
//!
//! 1. hysteresis per metric: a rule must be crossed on `confirmations`
//!    consecutive readings before it latches, and clears on the first
//!    reading that does not cross;
//! 2. delivery gating for newly latched metrics: the notification window
//!    in the scope's timezone, then the alert-rate cooldown.
//!
//! The engine is synchronous and does no I/O. One instance owns the state of
//! one scope; callers must not evaluate concurrently against the same engine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cooldown::CooldownTracker;
use super::state::{AlarmTable, Transition};
use crate::config::{Direction, NotificationPreferences, RuleSet, ThresholdRule};
use crate::data::{MetricCatalog, MetricReading};

/// Consecutive crossing readings required to raise an alarm
pub const DEFAULT_CONFIRMATIONS: u32 = 2;

/// Why an evaluation did not produce a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuppressReason {
    NoThresholdCrossing,
    OutsideNotificationWindow,
    CooldownActive,
}

impl SuppressReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoThresholdCrossing => "no-threshold-crossing",
            Self::OutsideNotificationWindow => "outside-notification-window",
            Self::CooldownActive => "cooldown-active",
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A newly confirmed threshold crossing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub metric_id: String,
    pub observed_value: f64,
    pub limit: f64,
    pub direction: Direction,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationResult {
    Suppressed { reason: SuppressReason },
    Triggered { alerts: Vec<Alert>, message: String },
}

impl EvaluationResult {
    fn suppressed(reason: SuppressReason) -> Self {
        Self::Suppressed { reason }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, Self::Triggered { .. })
    }

    pub fn reason(&self) -> Option<SuppressReason> {
        match self {
            Self::Suppressed { reason } => Some(*reason),
            Self::Triggered { .. } => None,
        }
    }
}

/// Alarm and cooldown state for one scope
pub struct AlertEngine {
    confirmations: u32,
    rules: Vec<ThresholdRule>,
    rules_revision: Option<u64>,
    alarms: AlarmTable,
    cooldown: CooldownTracker,
    catalog: Arc<MetricCatalog>,
    last_reading_at: Option<DateTime<Utc>>,
}

impl AlertEngine {
    pub fn new(catalog: Arc<MetricCatalog>) -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            rules: Vec::new(),
            rules_revision: None,
            alarms: AlarmTable::new(),
            cooldown: CooldownTracker::new(),
            catalog,
            last_reading_at: None,
        }
    }

    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    pub fn alarms(&self) -> &AlarmTable {
        &self.alarms
    }

    pub fn cooldown(&self) -> &CooldownTracker {
        &self.cooldown
    }

    /// Replace the rules and start over with a zeroed alarm table for the
    /// new metric set. Cooldown is kept: it limits deliveries, not metrics.
    pub fn reload_rules(&mut self, rules: Vec<ThresholdRule>) {
        self.alarms = AlarmTable::for_rules(&rules);
        self.rules = rules;
        self.rules_revision = None;
    }

    /// Adopt a provider's rule set, reloading only when its revision changed
    pub fn sync_rules(&mut self, rule_set: &RuleSet) {
        if self.rules_revision == Some(rule_set.revision) {
            return;
        }
        if self.rules_revision.is_some() {
            tracing::info!(
                revision = rule_set.revision,
                rules = rule_set.rules.len(),
                "Threshold rules changed, resetting alarm state"
            );
        }
        self.reload_rules(rule_set.rules.clone());
        self.rules_revision = Some(rule_set.revision);
    }

    /// Evaluate one reading. The reading's timestamp is the evaluation
    /// instant for the window and cooldown gates.
    pub fn evaluate(
        &mut self,
        reading: &MetricReading,
        preferences: &NotificationPreferences,
    ) -> EvaluationResult {
        let now = reading.timestamp;
        if self.last_reading_at.is_some_and(|last| now < last) {
            tracing::warn!(
                timestamp = %now,
                "Reading older than the previous one; evaluating in arrival order"
            );
        }
        self.last_reading_at = Some(self.last_reading_at.map_or(now, |last| last.max(now)));

        let mut triggered: Vec<(&ThresholdRule, f64)> = Vec::new();
        let mut latched = false;

        for rule in &self.rules {
            let Some(value) = reading.value(&rule.metric_id) else {
                continue;
            };

            match self
                .alarms
                .entry(&rule.metric_id)
                .observe(rule.crossed(value), self.confirmations)
            {
                Transition::Triggered => triggered.push((rule, value)),
                Transition::Latched => latched = true,
                Transition::Cleared => {
                    tracing::info!(metric = %rule.metric_id, value, "Alarm cleared");
                }
                Transition::Pending | Transition::Idle => {}
            }
        }

        let interval = preferences.alert_rate.min_interval();

        if triggered.is_empty() {
            // A latched alarm inside the cooldown reports the gate that would
            // hold it back; nothing is mutated either way.
            let reason = if latched && self.cooldown.is_active(now, interval) {
                SuppressReason::CooldownActive
            } else {
                SuppressReason::NoThresholdCrossing
            };
            return EvaluationResult::suppressed(reason);
        }

        if !preferences
            .notify_window
            .contains_instant(now, preferences.timezone)
        {
            tracing::debug!(
                metrics = triggered.len(),
                "Alert suppressed (outside notification window)"
            );
            return EvaluationResult::suppressed(SuppressReason::OutsideNotificationWindow);
        }

        if self.cooldown.is_active(now, interval) {
            tracing::debug!(
                metrics = triggered.len(),
                rate = %preferences.alert_rate,
                "Alert suppressed (cooldown active)"
            );
            return EvaluationResult::suppressed(SuppressReason::CooldownActive);
        }

        let alerts: Vec<Alert> = triggered
            .into_iter()
            .map(|(rule, value)| self.build_alert(rule, value))
            .collect();
        let message = alerts
            .iter()
            .map(|a| a.message.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        self.cooldown.record(now);
        tracing::info!(alerts = alerts.len(), message = %message, "Alert triggered");

        EvaluationResult::Triggered { alerts, message }
    }

    fn build_alert(&self, rule: &ThresholdRule, value: f64) -> Alert {
        let message = format!(
            "{}: {} ({} {})",
            rule.display_label(),
            self.catalog.format_value(&rule.metric_id, value),
            rule.direction.comparator(),
            self.catalog.format_value(&rule.metric_id, rule.limit),
        );
        Alert {
            metric_id: rule.metric_id.clone(),
            observed_value: value,
            limit: rule.limit,
            direction: rule.direction,
            message,
        }
    }
}
