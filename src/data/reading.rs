//! Sensor readings
//!
//! A reading is a bag of metric values plus a timestamp. Parsing is tolerant:
//! anything that is not a finite number (or a string holding one) is dropped,
//! so a malformed field never rejects the rest of the reading.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::metric::MetricCatalog;

/// One normalized observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Metric id -> value; `None` marks a metric that was reported empty
    pub values: BTreeMap<String, Option<f64>>,
    pub timestamp: DateTime<Utc>,
}

impl MetricReading {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            values: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_value(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.values.insert(metric.into(), Some(value));
        self
    }

    /// Finite value for a metric, if present
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values
            .get(metric)
            .copied()
            .flatten()
            .filter(|v| v.is_finite())
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(|v| v.is_none())
    }

    /// Build a reading from a JSON object.
    ///
    /// `timestamp` may be epoch milliseconds or RFC 3339; when it is missing
    /// or unparseable, `received_at` is used.
    pub fn from_json(
        obj: &serde_json::Map<String, serde_json::Value>,
        catalog: &MetricCatalog,
        received_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = obj
            .get("timestamp")
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        let mut values = BTreeMap::new();
        for (key, value) in obj {
            if key == "timestamp" || key == "scope" {
                continue;
            }
            let id = catalog.canonical_id(key);
            if id.is_empty() {
                continue;
            }
            // aliases of one metric may collide; the first usable value wins
            let parsed = numeric_value(value);
            values
                .entry(id)
                .and_modify(|current: &mut Option<f64>| {
                    if current.is_none() {
                        *current = parsed;
                    }
                })
                .or_insert(parsed);
        }

        Self { values, timestamp }
    }
}

/// Coerce a JSON value into a finite number
fn numeric_value(json: &serde_json::Value) -> Option<f64> {
    let value = match json {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn parse_timestamp(json: &serde_json::Value) -> Option<DateTime<Utc>> {
    match json {
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}
