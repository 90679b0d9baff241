//! Metric catalog
//!
//! Maps metric identifiers to display labels, input aliases and rendering
//! precision. Adding a sensor metric is a catalog entry, not a code change.

use serde::{Deserialize, Serialize};

/// Catalog entry for a single metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Canonical metric identifier (e.g. "aqi")
    pub id: String,
    /// Human-readable label used for default rules and reports
    pub label: String,
    /// Alternative spellings accepted from sensors
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Decimal places used when rendering values
    #[serde(default)]
    pub precision: Option<usize>,
}

impl MetricSpec {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            aliases: Vec::new(),
            precision: None,
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Set of known metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricCatalog {
    metrics: Vec<MetricSpec>,
}

impl MetricCatalog {
    pub fn new(metrics: Vec<MetricSpec>) -> Self {
        Self { metrics }
    }

    /// Built-in environmental metrics
    pub fn environmental() -> Self {
        Self::new(vec![
            MetricSpec::new("temperature", "Temperature")
                .with_aliases(&["temp", "temp_c"])
                .with_precision(1),
            MetricSpec::new("humidity", "Humidity")
                .with_aliases(&["hum", "rh"])
                .with_precision(0),
            MetricSpec::new("aqi", "Air Quality")
                .with_aliases(&["air_quality", "airquality"])
                .with_precision(0),
            MetricSpec::new("uv", "UV Index")
                .with_aliases(&["uv_index", "uvi"])
                .with_precision(1),
            MetricSpec::new("pressure", "Pressure")
                .with_aliases(&["baro", "pressure_hpa"])
                .with_precision(1),
            MetricSpec::new("rain", "Rain")
                .with_aliases(&["rainfall", "precipitation"])
                .with_precision(1),
        ])
    }

    pub fn metrics(&self) -> &[MetricSpec] {
        &self.metrics
    }

    pub fn get(&self, id: &str) -> Option<&MetricSpec> {
        self.metrics.iter().find(|m| m.id == id)
    }

    /// Canonical id for a raw key: trimmed, lower-cased and alias-resolved.
    /// Unknown keys are returned normalized but otherwise untouched.
    pub fn canonical_id(&self, raw: &str) -> String {
        let key = raw.trim().to_ascii_lowercase();
        self.metrics
            .iter()
            .find(|m| m.id == key || m.aliases.iter().any(|a| *a == key))
            .map(|m| m.id.clone())
            .unwrap_or(key)
    }

    /// Display label, falling back to the metric id
    pub fn label<'a>(&'a self, id: &'a str) -> &'a str {
        self.get(id).map(|m| m.label.as_str()).unwrap_or(id)
    }

    /// Render a value with the metric's precision
    pub fn format_value(&self, id: &str, value: f64) -> String {
        match self.get(id).and_then(|m| m.precision) {
            Some(precision) => format!("{:.*}", precision, value),
            None => format!("{}", value),
        }
    }
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::environmental()
    }
}
