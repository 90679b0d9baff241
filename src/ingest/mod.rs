//! Reading ingestion
//!
//! Readings arrive over HTTP (see `api`) or, with the `kafka` feature, from a
//! Kafka consumer. Both decode the same JSON payloads:
//!
//! ```json
//! {"scope": "home", "readings": [{"timestamp": 1714557600000, "aqi": 120}]}
//! ```
//!
//! or a single reading object, whose scope comes from its `scope` key or
//! the caller's fallback.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaConsumer};

use chrono::{DateTime, Utc};

use crate::alerts::ScopedReading;
use crate::data::{MetricCatalog, MetricReading};

/// Decode a payload into readings, in payload order
pub fn parse_payload(
    payload: &[u8],
    fallback_scope: &str,
    catalog: &MetricCatalog,
    received_at: DateTime<Utc>,
) -> Result<Vec<ScopedReading>, ProcessError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| ProcessError::Parse(e.to_string()))?;
    parse_value(&value, fallback_scope, catalog, received_at)
}

/// Decode an already parsed JSON document
pub fn parse_value(
    value: &serde_json::Value,
    fallback_scope: &str,
    catalog: &MetricCatalog,
    received_at: DateTime<Utc>,
) -> Result<Vec<ScopedReading>, ProcessError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ProcessError::Parse("expected JSON object".to_string()))?;

    let scope = scope_of(obj).unwrap_or(fallback_scope).to_string();

    if let Some(readings) = obj.get("readings") {
        // Batch format: {"scope": "name", "readings": [...]}
        let readings = readings
            .as_array()
            .ok_or_else(|| ProcessError::Parse("'readings' must be an array".to_string()))?;

        return readings
            .iter()
            .map(|entry| {
                let entry = entry.as_object().ok_or_else(|| {
                    ProcessError::Parse("each reading must be a JSON object".to_string())
                })?;
                Ok(ScopedReading {
                    scope: scope_of(entry).unwrap_or(scope.as_str()).to_string(),
                    reading: MetricReading::from_json(entry, catalog, received_at),
                })
            })
            .collect();
    }

    Ok(vec![ScopedReading {
        scope,
        reading: MetricReading::from_json(obj, catalog, received_at),
    }])
}

fn scope_of(obj: &serde_json::Map<String, serde_json::Value>) -> Option<&str> {
    obj.get("scope")
        .and_then(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Pipeline closed")]
    Closed,
}
