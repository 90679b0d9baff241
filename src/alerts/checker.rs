//! Alert pipeline
//!
//! Owns one [`AlertEngine`] per scope and runs every reading through it.
//! Evaluations of a scope are serialized by the engine's mutex; scopes are
//! independent. Triggered outcomes are recorded in the notification log and
//! handed to the dispatcher on a separate task so delivery never delays the
//! next evaluation.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};

use super::engine::{AlertEngine, EvaluationResult, DEFAULT_CONFIRMATIONS};
use super::notifier::{Dispatcher, OutgoingMessage};
use super::state::AlarmState;
use crate::config::{ConfigError, ConfigProvider};
use crate::data::{MetricCatalog, MetricReading};
use crate::storage::{NotificationKind, NotificationLog, ReadingStore};

/// A reading addressed to a scope
#[derive(Debug, Clone)]
pub struct ScopedReading {
    pub scope: String,
    pub reading: MetricReading,
}

pub struct AlertPipeline {
    config: Arc<dyn ConfigProvider>,
    catalog: Arc<MetricCatalog>,
    engines: DashMap<String, Arc<Mutex<AlertEngine>>>,
    confirmations: u32,
    readings: Arc<ReadingStore>,
    notifications: Arc<NotificationLog>,
    dispatcher: Arc<Dispatcher>,
    /// Shutdown signal sender
    shutdown_tx: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
}

impl AlertPipeline {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        catalog: Arc<MetricCatalog>,
        readings: Arc<ReadingStore>,
        notifications: Arc<NotificationLog>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            catalog,
            engines: DashMap::new(),
            confirmations: DEFAULT_CONFIRMATIONS,
            readings,
            notifications,
            dispatcher,
            shutdown_tx: parking_lot::Mutex::new(None),
        }
    }

    /// Consecutive crossings required before an alarm latches
    pub fn with_confirmations(mut self, confirmations: u32) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    fn engine_for(&self, scope: &str) -> Arc<Mutex<AlertEngine>> {
        let engine = self.engines.entry(scope.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(
                AlertEngine::new(Arc::clone(&self.catalog)).with_confirmations(self.confirmations),
            ))
        });
        Arc::clone(engine.value())
    }

    /// Evaluate one reading for a scope.
    ///
    /// A configuration failure aborts the evaluation before any alarm or
    /// cooldown state is touched.
    pub async fn process(
        &self,
        scope: &str,
        reading: MetricReading,
    ) -> Result<EvaluationResult, ConfigError> {
        self.readings.record(scope, reading.clone());

        let engine = self.engine_for(scope);
        let mut engine = engine.lock().await;

        let rules = self.config.threshold_rules(scope)?;
        let preferences = self.config.notification_preferences(scope)?;

        engine.sync_rules(&rules);
        let result = engine.evaluate(&reading, &preferences);

        if let EvaluationResult::Triggered { alerts, message } = &result {
            self.notifications.append(
                scope,
                NotificationKind::Alert,
                message.clone(),
                alerts.clone(),
                reading.timestamp,
            );

            let dispatcher = Arc::clone(&self.dispatcher);
            let outgoing = OutgoingMessage::alert(scope, message.clone());
            tokio::spawn(async move {
                let report = dispatcher.dispatch(&outgoing).await;
                if report.failed > 0 {
                    tracing::warn!(
                        scope = %outgoing.scope,
                        failed = report.failed,
                        delivered = report.delivered,
                        "Alert delivered partially"
                    );
                }
            });
        } else if let Some(reason) = result.reason() {
            tracing::debug!(scope, reason = %reason, "Reading evaluated, no delivery");
        }

        Ok(result)
    }

    /// Apply the scope's current rules to its engine right away.
    ///
    /// Scopes without an engine are skipped; their first reading picks the
    /// rules up. Rules are read under the engine lock, so the newest revision
    /// wins over concurrent writers.
    pub async fn reload(&self, scope: &str) -> Result<(), ConfigError> {
        let Some(engine) = self.engines.get(scope).map(|e| Arc::clone(e.value())) else {
            return Ok(());
        };
        let mut engine = engine.lock().await;
        let rules = self.config.threshold_rules(scope)?;
        engine.sync_rules(&rules);
        Ok(())
    }

    /// Current alarm table of a scope, sorted by metric
    pub async fn alarm_states(&self, scope: &str) -> Vec<(String, AlarmState)> {
        let Some(engine) = self.engines.get(scope).map(|e| Arc::clone(e.value())) else {
            return Vec::new();
        };
        let engine = engine.lock().await;
        let mut states: Vec<(String, AlarmState)> = engine
            .alarms()
            .iter()
            .map(|(metric, state)| (metric.clone(), *state))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Consume readings in arrival order until stopped or the channel closes
    pub fn start(self: Arc<Self>, mut rx: mpsc::Receiver<ScopedReading>) -> tokio::task::JoinHandle<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        tokio::spawn(async move {
            tracing::info!("Alert pipeline started");

            loop {
                tokio::select! {
                    next = rx.recv() => {
                        let Some(ScopedReading { scope, reading }) = next else {
                            tracing::info!("Reading channel closed");
                            break;
                        };
                        if let Err(e) = self.process(&scope, reading).await {
                            tracing::error!(
                                scope = %scope,
                                error = %e,
                                "Skipping reading, configuration unavailable"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Alert pipeline shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the background loop
    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::engine::SuppressReason;
    use crate::config::{
        ConfigStore, Direction, NotificationPreferences, RuleSet, ThresholdRule,
    };
    use crate::storage::SubscriberStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn aqi(at: DateTime<Utc>, value: f64) -> MetricReading {
        MetricReading::new(at).with_value("aqi", value)
    }

    fn pipeline(config: Arc<dyn ConfigProvider>) -> (Arc<AlertPipeline>, Arc<NotificationLog>) {
        let notifications = Arc::new(NotificationLog::default());
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(SubscriberStore::new()), None));
        let pipeline = AlertPipeline::new(
            config,
            Arc::new(MetricCatalog::default()),
            Arc::new(ReadingStore::default()),
            Arc::clone(&notifications),
            dispatcher,
        );
        (Arc::new(pipeline), notifications)
    }

    fn store_with_aqi(limit: f64) -> Arc<ConfigStore> {
        let store = Arc::new(ConfigStore::new(MetricCatalog::default()));
        store
            .set_rules("default", vec![ThresholdRule::new("aqi", Direction::Above, limit)])
            .unwrap();
        store
    }

    /// Provider whose reads can be switched off separately
    struct FlakyProvider {
        inner: ConfigStore,
        rules_down: AtomicBool,
        preferences_down: AtomicBool,
    }

    impl FlakyProvider {
        fn new(inner: ConfigStore) -> Arc<Self> {
            Arc::new(Self {
                inner,
                rules_down: AtomicBool::new(false),
                preferences_down: AtomicBool::new(false),
            })
        }
    }

    impl ConfigProvider for FlakyProvider {
        fn threshold_rules(&self, scope: &str) -> Result<RuleSet, ConfigError> {
            if self.rules_down.load(Ordering::SeqCst) {
                return Err(ConfigError::Unavailable("store offline".to_string()));
            }
            self.inner.threshold_rules(scope)
        }

        fn notification_preferences(
            &self,
            scope: &str,
        ) -> Result<NotificationPreferences, ConfigError> {
            if self.preferences_down.load(Ordering::SeqCst) {
                return Err(ConfigError::Unavailable("preferences offline".to_string()));
            }
            self.inner.notification_preferences(scope)
        }
    }

    #[tokio::test]
    async fn test_process_triggers_and_logs_notification() {
        let (pipeline, notifications) = pipeline(store_with_aqi(450.0));

        let first = pipeline.process("default", aqi(t0(), 500.0)).await.unwrap();
        assert_eq!(first.reason(), Some(SuppressReason::NoThresholdCrossing));

        let second = pipeline
            .process("default", aqi(t0() + Duration::seconds(10), 520.0))
            .await
            .unwrap();
        assert!(second.is_triggered());

        let records = notifications.list(Some("default"), 10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "aqi: 520 (>= 450)");

        let states = pipeline.alarm_states("default").await;
        assert_eq!(states.len(), 1);
        assert!(states[0].1.is_alarming);
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let (pipeline, _) = pipeline(store_with_aqi(450.0));

        pipeline.process("default", aqi(t0(), 500.0)).await.unwrap();
        // default rules for "lab" put aqi at 300; one crossing is still pending
        let lab = pipeline.process("lab", aqi(t0(), 500.0)).await.unwrap();
        assert_eq!(lab.reason(), Some(SuppressReason::NoThresholdCrossing));

        let default = pipeline
            .process("default", aqi(t0() + Duration::seconds(10), 500.0))
            .await
            .unwrap();
        assert!(default.is_triggered());
        assert!(pipeline.alarm_states("lab").await.iter().all(|(_, s)| !s.is_alarming));
    }

    #[tokio::test]
    async fn test_config_failure_leaves_state_untouched() {
        let inner = ConfigStore::new(MetricCatalog::default());
        inner
            .set_rules("default", vec![ThresholdRule::new("aqi", Direction::Above, 450.0)])
            .unwrap();
        let provider = FlakyProvider::new(inner);
        let (pipeline, _) = pipeline(provider.clone());

        pipeline.process("default", aqi(t0(), 500.0)).await.unwrap();

        provider.rules_down.store(true, Ordering::SeqCst);
        let failed = pipeline
            .process("default", aqi(t0() + Duration::seconds(10), 500.0))
            .await;
        assert!(matches!(failed, Err(ConfigError::Unavailable(_))));
        let states = pipeline.alarm_states("default").await;
        assert_eq!(states[0].1.consecutive_count, 1);

        provider.rules_down.store(false, Ordering::SeqCst);
        let result = pipeline
            .process("default", aqi(t0() + Duration::seconds(20), 500.0))
            .await
            .unwrap();
        assert!(result.is_triggered());
    }

    #[tokio::test]
    async fn test_preferences_failure_leaves_state_untouched() {
        let inner = ConfigStore::new(MetricCatalog::default());
        inner
            .set_rules("default", vec![ThresholdRule::new("aqi", Direction::Above, 450.0)])
            .unwrap();
        let provider = FlakyProvider::new(inner);
        let (pipeline, notifications) = pipeline(provider.clone());

        pipeline.process("default", aqi(t0(), 500.0)).await.unwrap();

        // rules read succeeds and carries a new revision, preferences read fails
        provider
            .inner
            .set_rules("default", vec![ThresholdRule::new("uv", Direction::Above, 8.0)])
            .unwrap();
        provider.preferences_down.store(true, Ordering::SeqCst);
        let failed = pipeline
            .process("default", aqi(t0() + Duration::seconds(10), 500.0))
            .await;
        assert!(matches!(failed, Err(ConfigError::Unavailable(_))));

        let states = pipeline.alarm_states("default").await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, "aqi");
        assert_eq!(states[0].1.consecutive_count, 1);
        assert!(notifications.is_empty());
    }

    #[tokio::test]
    async fn test_reload_replaces_alarm_table_without_reading() {
        let store = store_with_aqi(450.0);
        let (pipeline, _) = pipeline(store.clone());

        // no engine yet, nothing to reload
        pipeline.reload("default").await.unwrap();
        assert!(pipeline.alarm_states("default").await.is_empty());

        pipeline.process("default", aqi(t0(), 500.0)).await.unwrap();
        store
            .set_rules("default", vec![ThresholdRule::new("uv", Direction::Above, 8.0)])
            .unwrap();
        pipeline.reload("default").await.unwrap();

        let states = pipeline.alarm_states("default").await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, "uv");
        assert_eq!(states[0].1.consecutive_count, 0);
    }

    #[tokio::test]
    async fn test_rule_update_resets_alarm_state() {
        let store = store_with_aqi(450.0);
        let (pipeline, _) = pipeline(store.clone());

        pipeline.process("default", aqi(t0(), 500.0)).await.unwrap();
        store
            .set_rules("default", vec![ThresholdRule::new("uv", Direction::Above, 8.0)])
            .unwrap();
        pipeline.process("default", aqi(t0() + Duration::seconds(10), 500.0)).await.unwrap();

        let states = pipeline.alarm_states("default").await;
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, "uv");
    }

    #[tokio::test]
    async fn test_background_loop_processes_in_order() {
        let (pipeline, notifications) = pipeline(store_with_aqi(450.0));
        let (tx, rx) = mpsc::channel(16);
        let handle = Arc::clone(&pipeline).start(rx);

        for (i, value) in [300.0, 500.0, 520.0, 530.0].into_iter().enumerate() {
            tx.send(ScopedReading {
                scope: "default".to_string(),
                reading: aqi(t0() + Duration::seconds(i as i64 * 10), value),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications.list(None, 1)[0].message, "aqi: 520 (>= 450)");
    }
}
