//! Bounded append-only log for a single key.

use crate::types::{KeySegment, Message, Offset, SubscriptionId};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Something that wants to hear about appends to a key.
pub trait KeyWaiter: Send + Sync {
    /// Called after a message for `key` has been appended.
    fn wake(&self, key: &str);
}

struct Entries {
    messages: VecDeque<Arc<Message>>,
    /// Offset of `messages[0]`.
    base: Offset,
}

impl Entries {
    fn tail(&self) -> Offset {
        self.base.advance(self.messages.len())
    }
}

/// Append-only, offset-addressed log of messages for one key.
///
/// At most `capacity` messages are retained; older ones are evicted and
/// the base offset moves forward. Offsets are never reused.
pub struct KeyLog {
    key: String,

    capacity: usize,

    entries: RwLock<Entries>,

    /// Subscriptions bound to this key.
    waiters: RwLock<HashMap<SubscriptionId, Arc<dyn KeyWaiter>>>,
}

impl KeyLog {
    /// Create an empty log. A capacity of 0 is treated as 1.
    pub fn new(key: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key: key.into(),
            capacity,
            entries: RwLock::new(Entries {
                messages: VecDeque::with_capacity(capacity.min(64)),
                base: Offset(0),
            }),
            waiters: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a message and wake every bound subscription.
    ///
    /// Waiters are only woken once the offset is final and the message is
    /// readable.
    pub fn append(&self, message: Message) -> Offset {
        let offset = {
            let mut entries = self.entries.write();
            let offset = entries.tail();
            entries.messages.push_back(Arc::new(message));
            while entries.messages.len() > self.capacity {
                entries.messages.pop_front();
                entries.base = entries.base.next();
            }
            offset
        };

        self.notify();
        offset
    }

    /// Read up to `limit` messages starting at `from`.
    ///
    /// Offsets below the oldest retained entry are clamped to it; offsets
    /// past the tail yield an empty segment positioned at the tail.
    pub fn read_from(&self, from: Offset, limit: usize) -> KeySegment {
        let entries = self.entries.read();
        let start = from.max(entries.base).min(entries.tail());
        if start > from {
            tracing::debug!(
                key = %self.key,
                requested = from.0,
                oldest = start.0,
                "cursor fell behind retention window, resuming from oldest entry"
            );
        }

        let skip = (start.0 - entries.base.0) as usize;
        let messages = entries
            .messages
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();

        KeySegment {
            key: self.key.clone(),
            offset: start,
            messages,
        }
    }

    /// Offset one past the newest entry.
    pub fn latest_offset(&self) -> Offset {
        self.entries.read().tail()
    }

    /// Offset of the oldest retained entry.
    pub fn oldest_offset(&self) -> Offset {
        self.entries.read().base
    }

    /// True if a read from `from` would return at least one message.
    pub fn has_data_after(&self, from: Offset) -> bool {
        from < self.latest_offset()
    }

    /// Number of retained messages.
    pub fn len(&self) -> usize {
        self.entries.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().messages.is_empty()
    }

    /// Bind a waiter and return the tail at the moment of binding.
    ///
    /// The waiter is registered before the tail is read, so any append
    /// landing at or after the returned offset wakes it.
    pub fn attach(&self, id: SubscriptionId, waiter: Arc<dyn KeyWaiter>) -> Offset {
        self.waiters.write().insert(id, waiter);
        self.latest_offset()
    }

    /// Unbind a waiter. Returns false if it was not bound.
    pub fn detach(&self, id: SubscriptionId) -> bool {
        self.waiters.write().remove(&id).is_some()
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.read().len()
    }

    fn notify(&self) {
        // Clone out so wake() never runs under the registry lock.
        let waiters: Vec<_> = self.waiters.read().values().cloned().collect();
        for waiter in waiters {
            waiter.wake(&self.key);
        }
    }
}
