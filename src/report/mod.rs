//! Scheduled sensor reports
//!
//! Once per tick the worker looks at every scope that has readings and, when the
//! scope's local wall clock matches one of its report times, sends a summary
//! of the latest reading to the scope's subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use moka::sync::Cache;
use tokio::time;

use crate::alerts::{local_clock, Dispatcher, OutgoingMessage};
use crate::config::clock::format_clock;
use crate::config::ConfigStore;
use crate::data::{MetricCatalog, MetricReading};
use crate::storage::{NotificationKind, NotificationLog, ReadingStore};

/// A report slot that already went out
type SlotKey = (String, NaiveDate, NaiveTime);

pub struct ReportWorker {
    config: Arc<ConfigStore>,
    readings: Arc<ReadingStore>,
    notifications: Arc<NotificationLog>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    running: Arc<AtomicBool>,
    sent: Cache<SlotKey, ()>,
}

impl ReportWorker {
    pub fn new(
        config: Arc<ConfigStore>,
        readings: Arc<ReadingStore>,
        notifications: Arc<NotificationLog>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            config,
            readings,
            notifications,
            dispatcher,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            sent: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(180))
                .build(),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Report worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let sent = self.run_once(Utc::now()).await;
                if sent > 0 {
                    tracing::info!("Report worker sent {} reports", sent);
                }
            }

            tracing::info!("Report worker stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send every report due at `now`; returns how many went out
    pub async fn run_once(&self, now: DateTime<Utc>) -> usize {
        let mut sent = 0;

        for scope in self.readings.scopes() {
            let preferences = self.config.scope(&scope).preferences;
            let clock = local_clock(now, preferences.timezone);
            if !preferences.report_times.contains(&clock) {
                continue;
            }

            let date = now.with_timezone(&preferences.timezone).date_naive();
            let key = (scope.clone(), date, clock);
            if self.sent.contains_key(&key) {
                continue;
            }
            self.sent.insert(key, ());

            let Some(reading) = self.readings.latest(&scope) else {
                tracing::debug!(scope = %scope, "No readings yet, skipping report");
                continue;
            };

            let body = build_summary(self.config.catalog(), &reading);
            let message = format!("{} report: {}", format_clock(&clock), body);
            self.notifications.append(
                &scope,
                NotificationKind::Report,
                message.clone(),
                Vec::new(),
                now,
            );

            let report = self
                .dispatcher
                .dispatch(&OutgoingMessage::report(&scope, message))
                .await;
            tracing::debug!(
                scope = %scope,
                delivered = report.delivered,
                failed = report.failed,
                "Report dispatched"
            );
            sent += 1;
        }

        sent
    }
}

/// One-line summary of a reading: `"<label>: <value>"` per metric
pub fn build_summary(catalog: &MetricCatalog, reading: &MetricReading) -> String {
    let parts: Vec<String> = reading
        .values
        .keys()
        .filter_map(|metric| {
            reading.value(metric).map(|value| {
                format!(
                    "{}: {}",
                    catalog.label(metric),
                    catalog.format_value(metric, value)
                )
            })
        })
        .collect();

    if parts.is_empty() {
        "no values".to_string()
    } else {
        parts.join(", ")
    }
}
