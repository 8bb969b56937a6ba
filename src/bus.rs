//! The message bus tying key logs and subscriptions together.

use crate::cursor::Cursor;
use crate::error::{BusError, Result};
use crate::log::KeyLogTable;
use crate::subscriber::{KeyChange, KeyListener, Subscriber};
use crate::subscriptions::{Continuation, Registry, Subscription, SubscriptionHandle, Worker};
use crate::types::{BusStats, Message, MessageResult, Offset, SubscriptionId};
use crossbeam_channel::bounded;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Bus configuration.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Messages retained per key before the oldest are evicted.
    pub key_log_capacity: usize,

    /// Batch size used by [`MessageBus::subscribe_with_defaults`].
    pub default_max_messages: usize,

    /// Thread name prefix for delivery workers.
    pub worker_name_prefix: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            key_log_capacity: 1000,
            default_max_messages: 10,
            worker_name_prefix: "pushbus-sub".to_string(),
        }
    }
}

/// In-process, multi-key message bus.
///
/// Provides:
/// - Publishing to per-key append logs with stable offsets
/// - Subscriptions over a dynamic set of keys with resumable cursors
/// - One delivery worker per subscription, woken by publishes
///
/// Cloning is cheap; clones share the same logs and subscriptions.
#[derive(Clone)]
pub struct MessageBus {
    config: Arc<BusConfig>,
    logs: Arc<KeyLogTable>,
    subscriptions: Arc<Registry>,
    next_id: Arc<AtomicU64>,
    published: Arc<AtomicU64>,
    shut_down: Arc<AtomicBool>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    pub fn with_config(config: BusConfig) -> Self {
        Self {
            logs: Arc::new(KeyLogTable::new(config.key_log_capacity)),
            config: Arc::new(config),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            published: Arc::new(AtomicU64::new(0)),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // --- Publishing ---

    /// Publish `value` under `key` and return its offset.
    ///
    /// Returns once the message is appended; delivery to subscribers
    /// happens on their own workers.
    pub fn publish(
        &self,
        source: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Offset {
        self.publish_message(Message::new(source, key, value))
    }

    /// Publish a fully built message (commands, acks).
    pub fn publish_message(&self, message: Message) -> Offset {
        let log = self.logs.get_or_create(&message.key);
        let offset = log.append(message);
        self.published.fetch_add(1, Ordering::Relaxed);
        offset
    }

    // --- Subscribing ---

    /// Subscribe `subscriber` to all of its event keys.
    ///
    /// With no cursor (or an empty one) every key starts live: only
    /// messages published from now on are delivered. With a cursor, keys it
    /// names resume from their recorded offset and the rest start live. A
    /// cursor older than a key's retention window resumes from the oldest
    /// retained message.
    ///
    /// `callback` receives batches of at most `max_messages` messages and
    /// is never invoked concurrently with itself.
    pub fn subscribe<F>(
        &self,
        subscriber: Arc<dyn Subscriber>,
        cursor: Option<&str>,
        callback: F,
        max_messages: usize,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(MessageResult) -> Continuation + Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(BusError::BusShutDown);
        }

        let cursor = match cursor {
            Some(raw) => Cursor::parse(raw)?,
            None => Cursor::new(),
        };

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (wake_tx, wake_rx) = bounded(1);
        let (cancel_tx, cancel_rx) = bounded(0);
        let subscription = Arc::new(Subscription::new(
            id,
            Arc::clone(&subscriber),
            max_messages,
            wake_tx,
            cancel_tx,
            Arc::downgrade(&self.subscriptions),
        ));
        self.subscriptions
            .write()
            .insert(id, Arc::clone(&subscription));

        // Listen before reading the key set so no change slips in between.
        subscriber.add_listener(id, self.key_listener(&subscription));

        for key in subscriber.event_keys() {
            let log = self.logs.get_or_create(&key);
            subscription.bind_initial(log, cursor.get(&key));
        }
        subscription.settle();

        let worker = Worker::new(
            Arc::clone(&subscription),
            wake_rx,
            cancel_rx,
            Box::new(callback),
        );
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.config.worker_name_prefix, id))
            .spawn(move || worker.run());

        if let Err(e) = spawned {
            subscription.release();
            return Err(BusError::WorkerSpawn(e));
        }

        tracing::debug!(
            subscription = %id,
            identity = %subscription.identity(),
            keys = ?subscription.bound_keys(),
            max_messages,
            "subscription created"
        );

        Ok(SubscriptionHandle { subscription })
    }

    /// [`subscribe`](Self::subscribe) with the configured default batch size.
    pub fn subscribe_with_defaults<F>(
        &self,
        subscriber: Arc<dyn Subscriber>,
        cursor: Option<&str>,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: FnMut(MessageResult) -> Continuation + Send + 'static,
    {
        self.subscribe(subscriber, cursor, callback, self.config.default_max_messages)
    }

    /// Listener that mirrors the subscriber's key changes onto `subscription`.
    fn key_listener(&self, subscription: &Arc<Subscription>) -> KeyListener {
        let weak = Arc::downgrade(subscription);
        let logs = Arc::clone(&self.logs);

        Arc::new(move |change: KeyChange| {
            let Some(subscription) = weak.upgrade() else {
                return;
            };
            match change {
                KeyChange::Added { key, cursor } => {
                    let log = logs.get_or_create(&key);
                    subscription.bind(log, cursor);
                }
                KeyChange::Removed { key } => {
                    subscription.unbind(&key);
                }
            }
        })
    }

    // --- Introspection ---

    /// Offset the next message on `key` will get. Does not create the key.
    pub fn latest_offset(&self, key: &str) -> Offset {
        self.logs
            .get(key)
            .map(|log| log.latest_offset())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            keys: self.logs.len(),
            subscriptions: self.subscription_count(),
            messages_published: self.published.load(Ordering::Relaxed),
        }
    }

    // --- Shutdown ---

    /// Dispose every live subscription and refuse new ones.
    ///
    /// Publishing keeps working; messages are simply not delivered.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let live: Vec<Arc<Subscription>> =
            self.subscriptions.read().values().cloned().collect();
        tracing::debug!(subscriptions = live.len(), "shutting down message bus");

        for subscription in live {
            subscription.dispose();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
