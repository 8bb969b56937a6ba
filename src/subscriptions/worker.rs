//! Delivery loop run by each subscription's worker thread.
//!
//! ```text
//!            wake                 batch
//!   Idle ─────────────► Draining ───────► Delivering
//!    ▲                    │  ▲               │
//!    └──── nothing read ──┘  └── proceed ────┘
//!
//!   Delivering ── stop ──► terminal result ──► Terminated
//!   any state  ── dispose / panic ───────────► Terminated
//! ```

use crate::types::MessageResult;
use crossbeam_channel::{select, Receiver};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use super::subscription::Subscription;
use super::types::{Continuation, DeliveryCallback, Signal, StopReason};

enum Outcome {
    Proceed,
    Stop,
    Abandoned,
    Cancelled,
}

pub(crate) struct Worker {
    subscription: Arc<Subscription>,
    wake_rx: Receiver<()>,
    cancel_rx: Receiver<()>,
    callback: DeliveryCallback,
}

impl Worker {
    pub(crate) fn new(
        subscription: Arc<Subscription>,
        wake_rx: Receiver<()>,
        cancel_rx: Receiver<()>,
        callback: DeliveryCallback,
    ) -> Self {
        Self {
            subscription,
            wake_rx,
            cancel_rx,
            callback,
        }
    }

    /// Run until the subscription terminates, then release it.
    pub(crate) fn run(mut self) -> StopReason {
        self.subscription.set_worker(thread::current().id());

        let reason = loop {
            // Idle
            select! {
                recv(self.wake_rx) -> msg => {
                    if msg.is_err() {
                        break StopReason::Disposed;
                    }
                }
                recv(self.cancel_rx) -> _ => break StopReason::Disposed,
            }

            if let Some(reason) = self.deliver_pending() {
                break reason;
            }
        };

        self.subscription.set_stop_reason(reason);
        self.subscription.release();
        match reason {
            StopReason::Faulted => tracing::warn!(
                subscription = %self.subscription.id(),
                identity = %self.subscription.identity(),
                "delivery stopped after callback fault"
            ),
            _ => tracing::debug!(
                subscription = %self.subscription.id(),
                reason = ?reason,
                "delivery loop finished"
            ),
        }
        reason
    }

    /// Drain and deliver until nothing is pending. Returns a reason if
    /// the subscription must terminate.
    fn deliver_pending(&mut self) -> Option<StopReason> {
        loop {
            if self.subscription.is_cancelled() {
                return Some(StopReason::Disposed);
            }

            let batch = self.subscription.drain()?;
            tracing::trace!(
                subscription = %self.subscription.id(),
                messages = batch.len(),
                "delivering batch"
            );

            let continuation = match self.invoke(batch) {
                Ok(Some(continuation)) => continuation,
                Ok(None) => return Some(StopReason::Disposed),
                Err(()) => return Some(StopReason::Faulted),
            };

            match self.wait(continuation) {
                Outcome::Proceed => continue,
                Outcome::Stop => {
                    let terminal = MessageResult::terminal(self.subscription.cursor_string());
                    // Cleanup call; its continuation is irrelevant.
                    return match self.invoke(terminal) {
                        Err(()) => Some(StopReason::Faulted),
                        Ok(_) => Some(StopReason::Stopped),
                    };
                }
                Outcome::Abandoned => return Some(StopReason::Faulted),
                Outcome::Cancelled => return Some(StopReason::Disposed),
            }
        }
    }

    /// Call the callback under the delivery gate.
    ///
    /// `Ok(None)` if the subscription was disposed before the call,
    /// `Err(())` if the callback panicked.
    fn invoke(&mut self, result: MessageResult) -> Result<Option<Continuation>, ()> {
        let subscription = Arc::clone(&self.subscription);
        let _gate = subscription.delivery_gate().lock();
        if subscription.is_cancelled() {
            return Ok(None);
        }

        let callback = &mut self.callback;
        catch_unwind(AssertUnwindSafe(|| callback(result)))
            .map(Some)
            .map_err(|_| ())
    }

    fn wait(&self, continuation: Continuation) -> Outcome {
        match continuation.0 {
            Signal::Ready(true) => Outcome::Proceed,
            Signal::Ready(false) => Outcome::Stop,
            Signal::Deferred(rx) => select! {
                recv(rx) -> keep_going => match keep_going {
                    Ok(true) => Outcome::Proceed,
                    Ok(false) => Outcome::Stop,
                    Err(_) => Outcome::Abandoned,
                },
                recv(self.cancel_rx) -> _ => Outcome::Cancelled,
            },
        }
    }
}
