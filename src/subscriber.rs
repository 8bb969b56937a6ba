//! The subscriber capability consumed by the bus.
//!
//! A subscriber is whatever sits on the other side of a connection: it has
//! an identity, a set of event keys it is interested in, and it may join or
//! leave keys while its subscription is live. The bus registers a listener
//! at subscribe time and removes it on disposal.

use crate::types::{Offset, SubscriptionId};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A change to a subscriber's key set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyChange {
    /// Start receiving `key`. With no cursor the key starts live.
    Added { key: String, cursor: Option<Offset> },
    /// Stop receiving `key`.
    Removed { key: String },
}

/// Callback invoked for each key change.
pub type KeyListener = Arc<dyn Fn(KeyChange) + Send + Sync>;

/// Anything that can hold a subscription on the bus.
pub trait Subscriber: Send + Sync {
    fn identity(&self) -> &str;

    /// Keys the subscriber is currently interested in.
    fn event_keys(&self) -> Vec<String>;

    /// Register a listener for key changes on behalf of a subscription.
    fn add_listener(&self, id: SubscriptionId, listener: KeyListener);

    /// Remove the listener registered for `id`. Must be idempotent.
    fn remove_listener(&self, id: SubscriptionId);
}

static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(1);

/// In-process [`Subscriber`] with a mutable key set.
pub struct LocalSubscriber {
    identity: String,
    keys: RwLock<Vec<String>>,
    listeners: RwLock<Vec<(SubscriptionId, KeyListener)>>,
}

impl LocalSubscriber {
    pub fn new<I, S>(identity: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for key in keys {
            let key = key.into();
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        Self {
            identity: identity.into(),
            keys: RwLock::new(unique),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Subscriber with a generated identity.
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let n = NEXT_LOCAL_ID.fetch_add(1, Ordering::Relaxed);
        Self::new(format!("local-{}", n), keys)
    }

    /// Join `key`, starting live.
    pub fn add_event(&self, key: impl Into<String>) {
        self.add(key.into(), None);
    }

    /// Join `key`, starting at `offset`.
    pub fn add_event_at(&self, key: impl Into<String>, offset: Offset) {
        self.add(key.into(), Some(offset));
    }

    /// Leave `key`.
    pub fn remove_event(&self, key: &str) {
        self.keys.write().retain(|k| k != key);
        self.emit(KeyChange::Removed {
            key: key.to_string(),
        });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn add(&self, key: String, cursor: Option<Offset>) {
        {
            let mut keys = self.keys.write();
            if !keys.contains(&key) {
                keys.push(key.clone());
            }
        }
        self.emit(KeyChange::Added { key, cursor });
    }

    fn emit(&self, change: KeyChange) {
        let listeners: Vec<KeyListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(change.clone());
        }
    }
}

impl Subscriber for LocalSubscriber {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn event_keys(&self) -> Vec<String> {
        self.keys.read().clone()
    }

    fn add_listener(&self, id: SubscriptionId, listener: KeyListener) {
        self.listeners.write().push((id, listener));
    }

    fn remove_listener(&self, id: SubscriptionId) {
        self.listeners.write().retain(|(owner, _)| *owner != id);
    }
}
