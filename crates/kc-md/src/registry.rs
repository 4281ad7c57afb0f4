//! Subscription registry: the authoritative set of active topic subscriptions.
//!
//! Keys are unique and kept in insertion order (order only matters for
//! replay after a reconnect). Every call that actually changes membership
//! publishes [`SessionEvent::Subscriptions`] with the full new set; no-op calls
//! publish nothing.

use kc_core::types::SubscriptionKey;

use crate::event::{SessionEvent, SessionEventSender};

/// Ordered, unique collection of [`SubscriptionKey`]s.
pub struct SubscriptionRegistry {
    keys: Vec<SubscriptionKey>,
    events: SessionEventSender,
}

impl SubscriptionRegistry {
    pub fn new(events: SessionEventSender) -> Self {
        Self { keys: Vec::new(), events }
    }

    /// Insert `key`. Returns `false` if it was already present.
    pub fn add(&mut self, key: SubscriptionKey) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.keys.push(key);
        self.notify();
        true
    }

    /// Remove `key`. Returns `false` if it was absent.
    pub fn remove(&mut self, key: &SubscriptionKey) -> bool {
        let Some(pos) = self.keys.iter().position(|k| k == key) else {
            return false;
        };
        self.keys.remove(pos);
        self.notify();
        true
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.keys.contains(key)
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Copy of the current keys in insertion order.
    pub fn snapshot(&self) -> Vec<SubscriptionKey> {
        self.keys.clone()
    }

    /// Empty the registry and return what it held, without publishing.
    ///
    /// Used by replay, which re-adds every key through the normal subscribe
    /// path (and so publishes as each one is re-added).
    pub fn take_all(&mut self) -> Vec<SubscriptionKey> {
        std::mem::take(&mut self.keys)
    }

    fn notify(&self) {
        // No receivers is fine.
        let _ = self.events.send(SessionEvent::Subscriptions(self.keys.clone()));
    }
}
