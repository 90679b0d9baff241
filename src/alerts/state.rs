//! Per-metric hysteresis state

use std::collections::HashMap;

use serde::Serialize;

use crate::config::ThresholdRule;

/// Outcome of feeding one comparison into an [`AlarmState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Not crossed and not alarming
    Idle,
    /// Crossed, waiting for more confirmations
    Pending,
    /// Crossed often enough to latch; a new trigger
    Triggered,
    /// Crossed while already latched
    Latched,
    /// Recovered from an alarm
    Cleared,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlarmState {
    pub is_alarming: bool,
    pub consecutive_count: u32,
}

impl AlarmState {
    /// Apply one comparison result.
    ///
    /// Raising needs `confirmations` consecutive crossings; clearing happens
    /// on the first non-crossing reading.
    pub fn observe(&mut self, crossed: bool, confirmations: u32) -> Transition {
        match (crossed, self.is_alarming) {
            (true, true) => Transition::Latched,
            (true, false) => {
                self.consecutive_count += 1;
                if self.consecutive_count >= confirmations.max(1) {
                    self.is_alarming = true;
                    self.consecutive_count = 0;
                    Transition::Triggered
                } else {
                    Transition::Pending
                }
            }
            (false, was_alarming) => {
                self.consecutive_count = 0;
                self.is_alarming = false;
                if was_alarming {
                    Transition::Cleared
                } else {
                    Transition::Idle
                }
            }
        }
    }
}

/// Alarm states keyed by metric id
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlarmTable {
    states: HashMap<String, AlarmState>,
}

impl AlarmTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh, zeroed table for exactly the metrics of `rules`
    pub fn for_rules(rules: &[ThresholdRule]) -> Self {
        Self {
            states: rules
                .iter()
                .map(|r| (r.metric_id.clone(), AlarmState::default()))
                .collect(),
        }
    }

    pub fn get(&self, metric: &str) -> Option<&AlarmState> {
        self.states.get(metric)
    }

    /// State for a metric, created on first use
    pub fn entry(&mut self, metric: &str) -> &mut AlarmState {
        self.states.entry(metric.to_string()).or_default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Metrics currently alarming, sorted
    pub fn alarming(&self) -> Vec<String> {
        let mut metrics: Vec<String> = self
            .states
            .iter()
            .filter(|(_, s)| s.is_alarming)
            .map(|(m, _)| m.clone())
            .collect();
        metrics.sort();
        metrics
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AlarmState)> {
        self.states.iter()
    }
}
