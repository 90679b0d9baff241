//! Notification history

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::alerts::Alert;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Alert,
    Report,
}

/// One persisted notification
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRecord {
    pub id: u64,
    pub scope: String,
    pub kind: NotificationKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<Alert>,
    pub created_at: DateTime<Utc>,
}

/// Bounded in-memory notification log, newest last
pub struct NotificationLog {
    records: RwLock<VecDeque<NotificationRecord>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn append(
        &self,
        scope: &str,
        kind: NotificationKind,
        message: impl Into<String>,
        alerts: Vec<Alert>,
        created_at: DateTime<Utc>,
    ) -> NotificationRecord {
        let record = NotificationRecord {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            scope: scope.to_string(),
            kind,
            message: message.into(),
            alerts,
            created_at,
        };

        let mut records = self.records.write();
        records.push_back(record.clone());
        while records.len() > self.capacity {
            records.pop_front();
        }
        record
    }

    /// Most recent records first, optionally filtered by scope
    pub fn list(&self, scope: Option<&str>, limit: usize) -> Vec<NotificationRecord> {
        self.records
            .read()
            .iter()
            .rev()
            .filter(|r| scope.map_or(true, |s| r.scope == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new(1000)
    }
}
