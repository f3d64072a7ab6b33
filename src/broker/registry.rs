//! Live subscriber connections.
//!
//! The registry only ever hands out `Arc` snapshots: callers iterate and push
//! after the lock is released, so a slow consumer never stalls registration
//! or other publishes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::client::{Subscriber, SubscriberId};
use crate::utils::error::HubError;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
    max_connections: Option<usize>,
}

impl SubscriptionRegistry {
    pub fn new(max_connections: Option<usize>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Add a subscriber. Fails on a duplicate id or when the cap is reached.
    pub fn register(&self, subscriber: Arc<Subscriber>) -> Result<(), HubError> {
        let mut subscribers = self.subscribers.write();
        if subscribers.contains_key(&subscriber.id) {
            return Err(HubError::validation(format!(
                "subscriber `{}` is already registered",
                subscriber.id
            )));
        }
        if let Some(max) = self.max_connections.filter(|max| subscribers.len() >= *max) {
            return Err(HubError::Unavailable(format!(
                "connection limit of {max} reached"
            )));
        }
        subscribers.insert(subscriber.id.clone(), subscriber);
        Ok(())
    }

    /// Remove a subscriber. Removing twice is a no-op returning `None`.
    pub fn unregister(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers.read().get(id).cloned()
    }

    /// Subscribers with a selector matching one of `topics`.
    ///
    /// Authorization of private updates is left to the caller.
    pub fn matching(&self, topics: &[String]) -> Vec<Arc<Subscriber>> {
        self.subscribers
            .read()
            .values()
            .filter(|s| s.filter.matches_topics(topics))
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        let mut all: Vec<_> = self.subscribers.read().values().cloned().collect();
        all.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every connection and empty the registry.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.subscribers.write().drain().map(|(_, s)| s).collect();
        for subscriber in drained {
            subscriber.cancel();
        }
    }
}
