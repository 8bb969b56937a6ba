//! Subscription types for message delivery.

use crate::types::{MessageResult, SubscriptionId};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;

use super::subscription::Subscription;

/// Callback invoked with each delivery batch.
///
/// Never invoked concurrently for the same subscription; the next batch is
/// only produced after the returned [`Continuation`] resolves to `true`.
pub type DeliveryCallback = Box<dyn FnMut(MessageResult) -> Continuation + Send>;

pub(crate) enum Signal {
    Ready(bool),
    Deferred(Receiver<bool>),
}

/// Whether delivery should keep going after a batch.
///
/// Either known immediately, or resolved later through a [`Resume`] from
/// any thread.
pub struct Continuation(pub(crate) Signal);

impl Continuation {
    pub fn ready(keep_going: bool) -> Self {
        Continuation(Signal::Ready(keep_going))
    }

    /// Keep delivering.
    pub fn proceed() -> Self {
        Self::ready(true)
    }

    /// Stop the subscription. A final terminal result is delivered.
    pub fn stop() -> Self {
        Self::ready(false)
    }

    /// A continuation resolved later by the returned [`Resume`].
    ///
    /// Dropping the `Resume` without calling it stops the subscription.
    pub fn deferred() -> (Self, Resume) {
        let (tx, rx) = bounded(1);
        (Continuation(Signal::Deferred(rx)), Resume(tx))
    }
}

impl From<bool> for Continuation {
    fn from(keep_going: bool) -> Self {
        Self::ready(keep_going)
    }
}

/// Completes a deferred [`Continuation`].
pub struct Resume(Sender<bool>);

impl Resume {
    pub fn resume(self, keep_going: bool) {
        // The worker may already be gone after disposal.
        let _ = self.0.send(keep_going);
    }
}

/// Why a subscription's delivery loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The handle was disposed or the bus shut down.
    Disposed,
    /// The callback asked to stop.
    Stopped,
    /// The callback panicked or abandoned its continuation.
    Faulted,
}

/// Handle to a live subscription.
///
/// Disposing (or dropping) the handle unbinds the subscription from all of
/// its keys. Once `dispose` returns on a thread other than the delivery
/// worker, no further callback invocations happen.
pub struct SubscriptionHandle {
    pub(crate) subscription: Arc<Subscription>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.subscription.id()
    }

    /// Identity of the subscriber that owns this subscription.
    pub fn identity(&self) -> &str {
        self.subscription.identity()
    }

    /// Serialized position after everything delivered so far.
    pub fn cursor(&self) -> String {
        self.subscription.cursor_string()
    }

    /// Keys currently bound.
    pub fn keys(&self) -> Vec<String> {
        self.subscription.bound_keys()
    }

    /// False once disposed or terminated.
    pub fn is_active(&self) -> bool {
        !self.subscription.is_released()
    }

    /// Why delivery ended, once it has.
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.subscription.stop_reason()
    }

    /// Unbind and stop delivery. Idempotent.
    pub fn dispose(&self) {
        self.subscription.dispose();
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.subscription.dispose();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id())
            .field("identity", &self.identity())
            .field("active", &self.is_active())
            .finish()
    }
}
