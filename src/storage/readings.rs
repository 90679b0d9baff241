//! Recent readings per scope

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::data::MetricReading;

/// Bounded in-memory history of readings, newest last
pub struct ReadingStore {
    scopes: DashMap<String, VecDeque<MetricReading>>,
    history_limit: usize,
}

impl ReadingStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            scopes: DashMap::new(),
            history_limit: history_limit.max(1),
        }
    }

    pub fn record(&self, scope: &str, reading: MetricReading) {
        let mut history = self.scopes.entry(scope.to_string()).or_default();
        history.push_back(reading);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    pub fn latest(&self, scope: &str) -> Option<MetricReading> {
        self.scopes
            .get(scope)
            .and_then(|history| history.back().cloned())
    }

    /// Scopes that have at least one reading, sorted
    pub fn scopes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Up to `limit` most recent readings, newest first
    pub fn recent(&self, scope: &str, limit: usize) -> Vec<MetricReading> {
        self.scopes
            .get(scope)
            .map(|history| history.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_latest_and_bounded_history() {
        let store = ReadingStore::new(3);
        assert!(store.latest("home").is_none());

        let base = Utc::now();
        for i in 0..5 {
            store.record(
                "home",
                MetricReading::new(base + Duration::seconds(i)).with_value("aqi", i as f64),
            );
        }

        assert_eq!(store.latest("home").unwrap().value("aqi"), Some(4.0));
        let recent = store.recent("home", 10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[2].value("aqi"), Some(2.0));
        assert!(store.recent("office", 10).is_empty());
        assert_eq!(store.scopes(), vec!["home".to_string()]);
    }
}
