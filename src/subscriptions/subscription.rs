//! Shared state of one live subscription.

use crate::cursor::Cursor;
use crate::log::{KeyLog, KeyWaiter};
use crate::subscriber::Subscriber;
use crate::types::{KeySegment, MessageResult, Offset, SubscriptionId};
use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use super::types::StopReason;

/// Live subscriptions by ID.
pub(crate) type Registry = RwLock<HashMap<SubscriptionId, Arc<Subscription>>>;

struct Binding {
    log: Arc<KeyLog>,
    /// Next offset to read.
    next: Offset,
}

#[derive(Default)]
struct BindState {
    bindings: HashMap<String, Binding>,
    /// Keys known to have unread data, in the order they became pending.
    pending: VecDeque<String>,
    pending_set: HashSet<String>,
    /// True until the initial key set has been bound.
    settling: bool,
    /// Keys removed while settling; the initial bind must skip them.
    departed: HashSet<String>,
}

impl BindState {
    /// Mark `key` pending if bound. True if the key is bound.
    fn mark_pending_or_bound(&mut self, key: &str) -> bool {
        self.mark_pending(key);
        self.bindings.contains_key(key)
    }

    fn mark_pending(&mut self, key: &str) -> bool {
        if !self.bindings.contains_key(key) || self.pending_set.contains(key) {
            return false;
        }
        self.pending_set.insert(key.to_string());
        self.pending.push_back(key.to_string());
        true
    }

    fn cursor(&self) -> Cursor {
        self.bindings
            .iter()
            .map(|(key, binding)| (key.clone(), binding.next))
            .collect()
    }
}

/// Wakes a subscription without keeping it alive.
struct Waker(Weak<Subscription>);

impl KeyWaiter for Waker {
    fn wake(&self, key: &str) {
        if let Some(subscription) = self.0.upgrade() {
            subscription.wake(key);
        }
    }
}

/// A subscriber's key bindings, cursors and wake-up plumbing.
pub(crate) struct Subscription {
    id: SubscriptionId,
    identity: String,
    max_messages: usize,
    subscriber: Arc<dyn Subscriber>,
    state: Mutex<BindState>,

    /// Capacity-1 channel; a full channel already means "wake pending".
    wake_tx: Sender<()>,
    /// Dropped on release, which disconnects the worker's receiver.
    cancel_tx: Mutex<Option<Sender<()>>>,

    cancelled: AtomicBool,
    released: AtomicBool,

    /// Held by the worker around each callback invocation.
    delivery_gate: Mutex<()>,
    worker: Mutex<Option<ThreadId>>,
    stop_reason: Mutex<Option<StopReason>>,

    registry: Weak<Registry>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        subscriber: Arc<dyn Subscriber>,
        max_messages: usize,
        wake_tx: Sender<()>,
        cancel_tx: Sender<()>,
        registry: Weak<Registry>,
    ) -> Self {
        Self {
            id,
            identity: subscriber.identity().to_string(),
            max_messages: max_messages.max(1),
            subscriber,
            state: Mutex::new(BindState {
                settling: true,
                ..BindState::default()
            }),
            wake_tx,
            cancel_tx: Mutex::new(Some(cancel_tx)),
            cancelled: AtomicBool::new(false),
            released: AtomicBool::new(false),
            delivery_gate: Mutex::new(()),
            worker: Mutex::new(None),
            stop_reason: Mutex::new(None),
            registry,
        }
    }

    pub(crate) fn id(&self) -> SubscriptionId {
        self.id
    }

    pub(crate) fn identity(&self) -> &str {
        &self.identity
    }

    /// Bind to `log`, starting at `start` or at the log's tail.
    ///
    /// Returns false if the key was already bound (its position is kept)
    /// or the subscription has been released.
    pub(crate) fn bind(self: &Arc<Self>, log: Arc<KeyLog>, start: Option<Offset>) -> bool {
        self.bind_key(log, start, false)
    }

    /// Bind a key from the subscriber's initial key set.
    ///
    /// Skipped if the key was removed after the key set was read.
    pub(crate) fn bind_initial(
        self: &Arc<Self>,
        log: Arc<KeyLog>,
        start: Option<Offset>,
    ) -> bool {
        self.bind_key(log, start, true)
    }

    /// End the initial binding phase.
    pub(crate) fn settle(&self) {
        let mut state = self.state.lock();
        state.settling = false;
        state.departed.clear();
    }

    fn bind_key(self: &Arc<Self>, log: Arc<KeyLog>, start: Option<Offset>, initial: bool) -> bool {
        let mut state = self.state.lock();
        if initial {
            if state.departed.contains(log.key()) {
                return false;
            }
        } else {
            state.departed.remove(log.key());
        }
        if self.is_released() || state.bindings.contains_key(log.key()) {
            return false;
        }

        let tail = log.attach(self.id, Arc::new(Waker(Arc::downgrade(self))));
        let next = start.unwrap_or(tail);
        let has_data = log.has_data_after(next);
        let key = log.key().to_string();
        tracing::trace!(subscription = %self.id, key = %key, next = next.0, "bound key");

        state.bindings.insert(key.clone(), Binding { log, next });
        if has_data && state.mark_pending(&key) {
            drop(state);
            self.signal();
        }
        true
    }

    /// Unbind `key`. Returns false if it was not bound.
    pub(crate) fn unbind(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        if state.settling {
            state.departed.insert(key.to_string());
        }
        if state.pending_set.remove(key) {
            state.pending.retain(|k| k != key);
        }

        // Detach under the state lock; bind attaches under it too.
        let removed = state.bindings.remove(key);
        match removed {
            Some(binding) => {
                binding.log.detach(self.id);
                drop(state);
                tracing::trace!(subscription = %self.id, key = %key, "unbound key");
                true
            }
            None => false,
        }
    }

    /// Record that `key` has new data and wake the worker.
    ///
    /// Signals even if `key` was already pending; a concurrent drain may
    /// have re-marked it before this entry became readable.
    pub(crate) fn wake(&self, key: &str) {
        let bound = self.state.lock().mark_pending_or_bound(key);
        if bound {
            self.signal();
        }
    }

    fn signal(&self) {
        // Full means a wake-up is already queued.
        let _ = self.wake_tx.try_send(());
    }

    /// Collect up to `max_messages` unread messages across pending keys.
    ///
    /// Advances the cursor of every key read. Keys that still have unread
    /// data once the budget runs out stay pending for the next batch, with
    /// keys that got no share of this batch queued ahead of those that did.
    pub(crate) fn drain(&self) -> Option<MessageResult> {
        let mut state = self.state.lock();
        let mut budget = self.max_messages;
        let mut segments = Vec::new();
        let mut skipped = Vec::new();
        let mut carry = Vec::new();

        while let Some(key) = state.pending.pop_front() {
            state.pending_set.remove(&key);
            if budget == 0 {
                skipped.push(key);
                continue;
            }

            // Unbound since it was marked
            let Some(binding) = state.bindings.get_mut(&key) else {
                continue;
            };

            let segment: KeySegment = binding.log.read_from(binding.next, budget);
            binding.next = segment.end_offset();
            if binding.log.has_data_after(binding.next) {
                carry.push(key);
            }

            if !segment.is_empty() {
                budget -= segment.len();
                segments.push(segment);
            }
        }

        for key in skipped.into_iter().chain(carry) {
            state.mark_pending(&key);
        }

        if segments.is_empty() {
            return None;
        }

        Some(MessageResult::batch(segments, state.cursor().to_string()))
    }

    pub(crate) fn cursor_string(&self) -> String {
        self.state.lock().cursor().to_string()
    }

    pub(crate) fn bound_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.lock().bindings.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub(crate) fn delivery_gate(&self) -> &Mutex<()> {
        &self.delivery_gate
    }

    pub(crate) fn set_worker(&self, thread: ThreadId) {
        *self.worker.lock() = Some(thread);
    }

    /// Record why delivery ended. The first reason wins.
    pub(crate) fn set_stop_reason(&self, reason: StopReason) {
        self.stop_reason.lock().get_or_insert(reason);
    }

    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }

    fn on_worker_thread(&self) -> bool {
        *self.worker.lock() == Some(thread::current().id())
    }

    /// Stop delivery and unbind everything.
    ///
    /// Off the worker thread this also waits for an in-flight callback
    /// invocation to return.
    pub(crate) fn dispose(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.set_stop_reason(StopReason::Disposed);
        if self.release() {
            tracing::debug!(subscription = %self.id, identity = %self.identity, "subscription disposed");
        }
        if !self.on_worker_thread() {
            drop(self.delivery_gate.lock());
        }
    }

    /// Unbind from all keys, detach from the subscriber and leave the
    /// registry. Returns false if already released.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancelled.store(true, Ordering::SeqCst);

        self.subscriber.remove_listener(self.id);

        let bindings = {
            let mut state = self.state.lock();
            state.pending.clear();
            state.pending_set.clear();
            std::mem::take(&mut state.bindings)
        };
        for binding in bindings.into_values() {
            binding.log.detach(self.id);
        }

        self.cancel_tx.lock().take();

        if let Some(registry) = self.registry.upgrade() {
            registry.write().remove(&self.id);
        }
        true
    }
}
