//! Alerting configuration: threshold rules and notification preferences
//!
//! Writes arrive as loosely-typed input (`ThresholdRuleInput`,
//! `PreferencesInput`) and are normalized into the strict types the engine
//! reads. Anything that does not normalize is a [`ValidationError`] and never
//! reaches the engine.

pub mod clock;
pub mod store;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::alerts::cooldown::AlertRate;
use crate::alerts::window::NotifyWindow;
use crate::data::MetricCatalog;

pub use store::{ConfigProvider, ConfigStore, RuleSet};

/// Which side of the limit counts as a crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    /// Inclusive comparison against the limit
    pub fn crossed(self, value: f64, limit: f64) -> bool {
        match self {
            Self::Above => value >= limit,
            Self::Below => value <= limit,
        }
    }

    pub fn comparator(self) -> &'static str {
        match self {
            Self::Above => ">=",
            Self::Below => "<=",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" | "gte" | ">=" => Ok(Self::Above),
            "below" | "lte" | "<=" => Ok(Self::Below),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Above => write!(f, "above"),
            Self::Below => write!(f, "below"),
        }
    }
}

/// Threshold for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric_id: String,
    pub limit: f64,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ThresholdRule {
    pub fn new(metric_id: impl Into<String>, direction: Direction, limit: f64) -> Self {
        Self {
            metric_id: metric_id.into(),
            limit,
            direction,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn crossed(&self, value: f64) -> bool {
        self.direction.crossed(value, self.limit)
    }

    /// Label used in alert messages
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.metric_id)
    }
}

/// Rules seeded for a scope that has never been configured
pub fn default_rules(catalog: &MetricCatalog) -> Vec<ThresholdRule> {
    [
        ("temperature", Direction::Above, 40.0),
        ("humidity", Direction::Above, 90.0),
        ("aqi", Direction::Above, 300.0),
        ("uv", Direction::Above, 8.0),
        ("pressure", Direction::Below, 980.0),
        ("rain", Direction::Above, 50.0),
    ]
    .into_iter()
    .map(|(metric, direction, limit)| {
        ThresholdRule::new(metric, direction, limit).with_label(catalog.label(metric))
    })
    .collect()
}

/// Per-scope delivery preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    /// Sorted, de-duplicated report times
    #[serde(with = "clock::hhmm_list")]
    pub report_times: Vec<NaiveTime>,
    pub alert_rate: AlertRate,
    pub notify_window: NotifyWindow,
    pub timezone: Tz,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            report_times: vec![
                NaiveTime::from_hms_opt(8, 0, 0).expect("08:00 is a valid time"),
                NaiveTime::from_hms_opt(20, 0, 0).expect("20:00 is a valid time"),
            ],
            alert_rate: AlertRate::Immediate,
            notify_window: NotifyWindow::always(),
            timezone: chrono_tz::UTC,
        }
    }
}

// ============================================================================
// Write-side input
// ============================================================================

/// Threshold rule as submitted by a client
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdRuleInput {
    pub metric_id: String,
    /// Kept loose so "NaN" or a string can be rejected with a clear message
    pub limit: serde_json::Value,
    pub direction: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Normalize a full rule set: canonical metric ids, finite limits, known
/// directions, no duplicate metrics.
pub fn normalize_rules(
    inputs: &[ThresholdRuleInput],
    catalog: &MetricCatalog,
) -> Result<Vec<ThresholdRule>, ValidationError> {
    let mut seen = HashSet::new();
    let mut rules = Vec::with_capacity(inputs.len());

    for input in inputs {
        let metric_id = catalog.canonical_id(&input.metric_id);
        if metric_id.is_empty() {
            return Err(ValidationError::EmptyMetricId);
        }

        let limit = match &input.limit {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NonFiniteLimit(metric_id.clone()))?;

        let direction = input
            .direction
            .parse::<Direction>()
            .map_err(|_| ValidationError::UnknownDirection(input.direction.clone()))?;

        if !seen.insert(metric_id.clone()) {
            return Err(ValidationError::DuplicateMetric(metric_id));
        }

        let label = input
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from);

        rules.push(ThresholdRule {
            metric_id,
            limit,
            direction,
            label,
        });
    }

    Ok(rules)
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowInput {
    pub start: String,
    pub end: String,
}

/// Notification preferences as submitted by a client
#[derive(Debug, Clone, Deserialize)]
pub struct PreferencesInput {
    pub report_times: Vec<String>,
    pub alert_rate: String,
    pub notify_window: WindowInput,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl PreferencesInput {
    pub fn normalize(&self) -> Result<NotificationPreferences, ValidationError> {
        let mut report_times = self
            .report_times
            .iter()
            .map(|t| clock::parse_clock(t))
            .collect::<Result<Vec<_>, _>>()?;
        report_times.sort();
        report_times.dedup();
        if report_times.is_empty() {
            return Err(ValidationError::EmptyReportTimes);
        }

        let alert_rate = self
            .alert_rate
            .parse::<AlertRate>()
            .map_err(|_| ValidationError::UnknownAlertRate(self.alert_rate.clone()))?;

        let notify_window = NotifyWindow::new(
            clock::parse_clock(&self.notify_window.start)?,
            clock::parse_clock(&self.notify_window.end)?,
        );

        let timezone = self
            .timezone
            .trim()
            .parse::<Tz>()
            .map_err(|_| ValidationError::UnknownTimezone(self.timezone.clone()))?;

        Ok(NotificationPreferences {
            report_times,
            alert_rate,
            notify_window,
            timezone,
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Malformed configuration write
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("metric_id must not be empty")]
    EmptyMetricId,

    #[error("limit for '{0}' must be a finite number")]
    NonFiniteLimit(String),

    #[error("unknown direction '{0}' (expected above or below)")]
    UnknownDirection(String),

    #[error("metric '{0}' is configured more than once")]
    DuplicateMetric(String),

    #[error("at least one report time is required")]
    EmptyReportTimes,

    #[error("unknown alert rate '{0}' (expected immediate, 15min, 30min or hourly)")]
    UnknownAlertRate(String),

    #[error("invalid time '{0}' (expected HH:MM)")]
    InvalidTime(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// Configuration could not be read or persisted
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration unavailable: {0}")]
    Unavailable(String),
}
