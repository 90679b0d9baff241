//! Skywatch: threshold alerting for environmental sensors
//!
//! Ingests periodic sensor readings (temperature, humidity, air quality, UV,
//! pressure, rain) and decides per reading whether to raise or clear an alarm
//! per metric and whether a raised alarm should be delivered right now.
//!
//! # Features
//!
//! - **Hysteresis**: an alarm latches after consecutive crossings and clears
//!   on the first recovered reading
//! - **Notification window**: deliveries only inside a daily window, evaluated
//!   in the scope's IANA timezone, overnight windows included
//! - **Cooldown**: alert rate limits the time between deliveries
//! - **Delivery**: chat bot, HTTP push and log targets per subscriber
//! - **Reports**: scheduled summaries of the latest reading
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::Utc;
//! use skywatch::alerts::AlertEngine;
//! use skywatch::config::{default_rules, NotificationPreferences};
//! use skywatch::data::{MetricCatalog, MetricReading};
//!
//! let catalog = Arc::new(MetricCatalog::default());
//! let mut engine = AlertEngine::new(Arc::clone(&catalog));
//! engine.reload_rules(default_rules(&catalog));
//!
//! let reading = MetricReading::new(Utc::now()).with_value("aqi", 320.0);
//! let result = engine.evaluate(&reading, &NotificationPreferences::default());
//! println!("{:?}", result);
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod data;
pub mod ingest;
pub mod report;
pub mod storage;

// Re-export commonly used types
pub use alerts::{AlertEngine, AlertPipeline, EvaluationResult, SuppressReason};
pub use config::{ConfigStore, NotificationPreferences, ThresholdRule};
pub use data::{MetricCatalog, MetricReading};
