//! Configuration store
//!
//! Holds rules and preferences per scope. Scopes that were never written
//! read as defaults and are not stored. When a snapshot path is set, every write is persisted as JSON (temp file +
//! rename) before it becomes visible, and the snapshot is loaded on open.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{default_rules, ConfigError, NotificationPreferences, ThresholdRule};
use crate::data::MetricCatalog;

/// Read side consumed by the alert pipeline
pub trait ConfigProvider: Send + Sync {
    /// Current rules of a scope together with their revision
    fn threshold_rules(&self, scope: &str) -> Result<RuleSet, ConfigError>;

    fn notification_preferences(&self, scope: &str)
        -> Result<NotificationPreferences, ConfigError>;
}

/// Rules plus a revision that changes whenever the rules are replaced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    pub revision: u64,
    pub rules: Vec<ThresholdRule>,
}

/// Everything configured for one scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    pub rules: Vec<ThresholdRule>,
    #[serde(skip)]
    pub rules_revision: u64,
    pub preferences: NotificationPreferences,
}

pub struct ConfigStore {
    scopes: DashMap<String, ScopeConfig>,
    catalog: MetricCatalog,
    snapshot_path: Option<PathBuf>,
    /// Serializes writers so snapshots never interleave
    write_lock: Mutex<()>,
    revisions: AtomicU64,
}

impl ConfigStore {
    /// In-memory store
    pub fn new(catalog: MetricCatalog) -> Self {
        Self {
            scopes: DashMap::new(),
            catalog,
            snapshot_path: None,
            write_lock: Mutex::new(()),
            revisions: AtomicU64::new(0),
        }
    }

    /// Store backed by a JSON snapshot; loads it when the file exists
    pub fn open<P: AsRef<Path>>(path: P, catalog: MetricCatalog) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new(catalog);

        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let scopes: BTreeMap<String, ScopeConfig> = serde_json::from_slice(&bytes)
                .map_err(|e| ConfigError::Serialization(e.to_string()))?;
            tracing::info!(
                path = %path.display(),
                scopes = scopes.len(),
                "Loaded configuration snapshot"
            );
            for (scope, config) in scopes {
                store.scopes.insert(scope, config);
            }
        }

        store.snapshot_path = Some(path);
        Ok(store)
    }

    pub fn catalog(&self) -> &MetricCatalog {
        &self.catalog
    }

    /// Configuration of a scope; defaults when it was never written
    pub fn scope(&self, scope: &str) -> ScopeConfig {
        match self.scopes.get(scope) {
            Some(config) => config.clone(),
            None => ScopeConfig {
                rules: default_rules(&self.catalog),
                rules_revision: 0,
                preferences: NotificationPreferences::default(),
            },
        }
    }

    /// Names of all scopes with stored configuration
    pub fn scopes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scopes.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Replace the rules of a scope; returns the new rule set
    pub fn set_rules(&self, scope: &str, rules: Vec<ThresholdRule>) -> Result<RuleSet, ConfigError> {
        let _guard = self.write_lock.lock();

        let mut config = self.scope(scope);
        config.rules = rules;
        config.rules_revision = self.revisions.fetch_add(1, Ordering::SeqCst) + 1;

        self.persist_with(scope, &config)?;

        let rule_set = RuleSet {
            revision: config.rules_revision,
            rules: config.rules.clone(),
        };
        self.scopes.insert(scope.to_string(), config);

        tracing::info!(
            scope,
            revision = rule_set.revision,
            rules = rule_set.rules.len(),
            "Threshold rules updated"
        );
        Ok(rule_set)
    }

    /// Replace the notification preferences of a scope
    pub fn set_preferences(
        &self,
        scope: &str,
        preferences: NotificationPreferences,
    ) -> Result<NotificationPreferences, ConfigError> {
        let _guard = self.write_lock.lock();

        let mut config = self.scope(scope);
        config.preferences = preferences;

        self.persist_with(scope, &config)?;
        let preferences = config.preferences.clone();
        self.scopes.insert(scope.to_string(), config);

        tracing::info!(scope, "Notification preferences updated");
        Ok(preferences)
    }

    /// Write a snapshot that includes `pending` for `scope`
    fn persist_with(&self, scope: &str, pending: &ScopeConfig) -> Result<(), ConfigError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut snapshot: BTreeMap<String, ScopeConfig> = self
            .scopes
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        snapshot.insert(scope.to_string(), pending.clone());

        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl ConfigProvider for ConfigStore {
    fn threshold_rules(&self, scope: &str) -> Result<RuleSet, ConfigError> {
        let config = self.scope(scope);
        Ok(RuleSet {
            revision: config.rules_revision,
            rules: config.rules,
        })
    }

    fn notification_preferences(
        &self,
        scope: &str,
    ) -> Result<NotificationPreferences, ConfigError> {
        Ok(self.scope(scope).preferences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::cooldown::AlertRate;
    use crate::config::Direction;
    use tempfile::TempDir;

    #[test]
    fn test_unwritten_scopes_read_as_defaults() {
        let store = ConfigStore::new(MetricCatalog::default());
        let rules = store.threshold_rules("campus-a").unwrap();

        assert_eq!(rules.revision, 0);
        assert_eq!(rules.rules.len(), 6);
        let pressure = rules.rules.iter().find(|r| r.metric_id == "pressure").unwrap();
        assert_eq!(pressure.direction, Direction::Below);
        assert_eq!(pressure.display_label(), "Pressure");
        assert!(store.scopes().is_empty());

        store
            .set_preferences("campus-b", NotificationPreferences::default())
            .unwrap();
        assert_eq!(store.scopes(), vec!["campus-b".to_string()]);
    }

    #[test]
    fn test_snapshot_skips_read_only_scopes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skywatch.json");

        let store = ConfigStore::open(&path, MetricCatalog::default()).unwrap();
        store.scope("lobby");
        store.threshold_rules("garage").unwrap();
        store.notification_preferences("attic").unwrap();
        store
            .set_rules("home", vec![ThresholdRule::new("aqi", Direction::Above, 450.0)])
            .unwrap();

        let reopened = ConfigStore::open(&path, MetricCatalog::default()).unwrap();
        assert_eq!(reopened.scopes(), vec!["home".to_string()]);
    }

    #[test]
    fn test_set_rules_bumps_revision_per_write() {
        let store = ConfigStore::new(MetricCatalog::default());
        let first = store
            .set_rules("a", vec![ThresholdRule::new("aqi", Direction::Above, 450.0)])
            .unwrap();
        let second = store
            .set_rules("b", vec![ThresholdRule::new("uv", Direction::Above, 9.0)])
            .unwrap();

        assert!(second.revision > first.revision);
        assert_eq!(store.threshold_rules("a").unwrap(), first);
        // preferences of the scope are untouched by rule writes
        assert_eq!(
            store.notification_preferences("a").unwrap(),
            NotificationPreferences::default()
        );
    }

    #[test]
    fn test_snapshot_persists_across_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config").join("skywatch.json");

        {
            let store = ConfigStore::open(&path, MetricCatalog::default()).unwrap();
            store
                .set_rules("home", vec![ThresholdRule::new("aqi", Direction::Above, 450.0)])
                .unwrap();
            let prefs = NotificationPreferences {
                alert_rate: AlertRate::Hourly,
                ..Default::default()
            };
            store.set_preferences("home", prefs).unwrap();
        }

        let reopened = ConfigStore::open(&path, MetricCatalog::default()).unwrap();
        let rules = reopened.threshold_rules("home").unwrap();
        assert_eq!(rules.rules.len(), 1);
        assert_eq!(rules.rules[0].limit, 450.0);
        assert_eq!(
            reopened.notification_preferences("home").unwrap().alert_rate,
            AlertRate::Hourly
        );
    }

    #[test]
    fn test_open_rejects_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("skywatch.json");
        std::fs::write(&path, b"{not json").unwrap();

        let result = ConfigStore::open(&path, MetricCatalog::default());
        assert!(matches!(result, Err(ConfigError::Serialization(_))));
    }
}
