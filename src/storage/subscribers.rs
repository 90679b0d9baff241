//! Subscriber registry

use dashmap::DashMap;

use crate::alerts::config::Subscriber;

#[derive(Default)]
pub struct SubscriberStore {
    subscribers: DashMap<String, Subscriber>,
}

impl SubscriberStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace; returns the previous entry
    pub fn upsert(&self, subscriber: Subscriber) -> Option<Subscriber> {
        self.subscribers.insert(subscriber.id.clone(), subscriber)
    }

    pub fn remove(&self, id: &str) -> Option<Subscriber> {
        self.subscribers.remove(id).map(|(_, s)| s)
    }

    pub fn get(&self, id: &str) -> Option<Subscriber> {
        self.subscribers.get(id).map(|s| s.clone())
    }

    /// All subscribers sorted by id
    pub fn list(&self) -> Vec<Subscriber> {
        let mut all: Vec<Subscriber> = self.subscribers.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Active subscribers of a scope
    pub fn active_for(&self, scope: &str) -> Vec<Subscriber> {
        self.list()
            .into_iter()
            .filter(|s| s.active && s.scope == scope)
            .collect()
    }
}
