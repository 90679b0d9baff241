//! Kafka consumer for sensor readings
//!
//! Decodes each message into readings and forwards them to the alert
//! pipeline in partition order. Offsets are committed only after the
//! readings were handed to the pipeline, so a restart resumes from the last
//! forwarded message.
//!
//! The topic name is the scope for messages that do not carry one.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `KAFKA_BROKERS`: Comma-separated list of brokers (default: localhost:9092)
//! - `KAFKA_TOPICS`: Comma-separated list of topics to consume
//! - `KAFKA_GROUP_ID`: Consumer group ID (default: skywatch)
//! - `KAFKA_AUTO_OFFSET_RESET`: Where to start if no offset (earliest/latest, default: earliest)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tokio::sync::mpsc;

use super::{parse_payload, ProcessError};
use crate::alerts::ScopedReading;
use crate::data::MetricCatalog;

/// Kafka consumer configuration
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topics: Vec<String>,
    pub group_id: String,
    /// earliest or latest
    pub auto_offset_reset: String,
    pub session_timeout_ms: u32,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topics: vec![],
            group_id: "skywatch".to_string(),
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 30000,
        }
    }
}

impl KafkaConfig {
    /// Create config from environment variables; `None` without topics
    pub fn from_env() -> Option<Self> {
        let topics = std::env::var("KAFKA_TOPICS").ok()?;
        if topics.trim().is_empty() {
            return None;
        }

        let defaults = Self::default();
        Some(Self {
            brokers: std::env::var("KAFKA_BROKERS").unwrap_or(defaults.brokers),
            topics: topics
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            group_id: std::env::var("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            auto_offset_reset: std::env::var("KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            session_timeout_ms: defaults.session_timeout_ms,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct KafkaStats {
    pub messages_received: u64,
    pub readings_forwarded: u64,
    pub errors: u64,
    pub last_offset: HashMap<String, i64>,
}

pub struct KafkaConsumer {
    config: KafkaConfig,
    consumer: StreamConsumer,
    catalog: Arc<MetricCatalog>,
    sink: mpsc::Sender<ScopedReading>,
    stats: Arc<parking_lot::RwLock<KafkaStats>>,
}

impl KafkaConsumer {
    pub fn new(
        config: KafkaConfig,
        catalog: Arc<MetricCatalog>,
        sink: mpsc::Sender<ScopedReading>,
    ) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .create()?;

        Ok(Self {
            config,
            consumer,
            catalog,
            sink,
            stats: Arc::new(parking_lot::RwLock::new(KafkaStats::default())),
        })
    }

    pub fn subscribe(&self) -> Result<(), KafkaError> {
        let topics: Vec<&str> = self.config.topics.iter().map(|s| s.as_str()).collect();
        self.consumer.subscribe(&topics)?;
        tracing::info!("Subscribed to Kafka topics: {:?}", self.config.topics);
        Ok(())
    }

    /// Shared handle to the consumer statistics
    pub fn stats(&self) -> Arc<parking_lot::RwLock<KafkaStats>> {
        Arc::clone(&self.stats)
    }

    /// Consume in the background until the pipeline goes away
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let Self {
            consumer,
            catalog,
            sink,
            stats,
            ..
        } = self;

        tokio::spawn(async move {
            tracing::info!("Kafka consumer started");

            loop {
                let message = match consumer.recv().await {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(error = %e, "Kafka receive error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                let topic = message.topic().to_string();
                let partition = message.partition();
                let offset = message.offset();
                stats.write().messages_received += 1;

                let Some(payload) = message.payload() else {
                    continue;
                };

                match forward(payload, &topic, &catalog, &sink).await {
                    Ok(count) => {
                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            tracing::error!(
                                topic = %topic,
                                partition = partition,
                                offset = offset,
                                error = %e,
                                "Failed to commit offset"
                            );
                        }
                        let mut s = stats.write();
                        s.readings_forwarded += count as u64;
                        s.last_offset.insert(format!("{}:{}", topic, partition), offset);
                    }
                    Err(ProcessError::Closed) => {
                        tracing::info!("Alert pipeline closed, Kafka consumer stopping");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(
                            topic = %topic,
                            partition = partition,
                            offset = offset,
                            error = %e,
                            "Failed to process message"
                        );
                        stats.write().errors += 1;
                    }
                }
            }
        })
    }
}

/// Decode one message and hand its readings to the pipeline in order
async fn forward(
    payload: &[u8],
    topic: &str,
    catalog: &MetricCatalog,
    sink: &mpsc::Sender<ScopedReading>,
) -> Result<usize, ProcessError> {
    let readings = parse_payload(payload, topic, catalog, chrono::Utc::now())?;
    let count = readings.len();
    for reading in readings {
        sink.send(reading).await.map_err(|_| ProcessError::Closed)?;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kafka_config_default() {
        let config = KafkaConfig::default();
        assert_eq!(config.brokers, "localhost:9092");
        assert_eq!(config.group_id, "skywatch");
    }

    #[tokio::test]
    async fn test_forward_uses_topic_as_scope() {
        let (tx, mut rx) = mpsc::channel(8);
        let catalog = MetricCatalog::default();

        let count = forward(br#"{"aqi": 320}"#, "rooftop", &catalog, &tx).await.unwrap();
        assert_eq!(count, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.scope, "rooftop");
        assert_eq!(received.reading.value("aqi"), Some(320.0));
    }

    #[tokio::test]
    async fn test_forward_reports_closed_pipeline() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let result = forward(br#"{"aqi": 1}"#, "t", &MetricCatalog::default(), &tx).await;
        assert!(matches!(result, Err(ProcessError::Closed)));
    }
}
