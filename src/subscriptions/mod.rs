//! Subscriptions and their delivery loops.
//!
//! A subscription binds a subscriber's keys, each with its own cursor, to a
//! delivery callback. Publishes to a bound key mark it pending and wake the
//! subscription's worker thread, which drains up to `max_messages` messages
//! across pending keys and hands them to the callback as one
//! [`MessageResult`](crate::MessageResult).
//!
//! Subscriptions support:
//! - Live start or resume from a cursor
//! - Keys joining and leaving while the subscription runs
//! - Immediate or deferred continuations from the callback
//! - Idempotent disposal that interrupts an idle or waiting worker
//!
//! # Example
//!
//! ```ignore
//! let bus = MessageBus::new();
//! let subscriber = Arc::new(LocalSubscriber::with_keys(["chat"]));
//!
//! let handle = bus.subscribe(
//!     subscriber,
//!     None,
//!     |result: MessageResult| {
//!         for message in result.messages() {
//!             println!("{}: {}", message.key, message.value);
//!         }
//!         Continuation::from(!result.terminal)
//!     },
//!     10,
//! )?;
//!
//! bus.publish("server", "chat", "hello");
//! // ...
//! handle.dispose();
//! ```

mod subscription;
mod types;
mod worker;

pub(crate) use subscription::{Registry, Subscription};
pub(crate) use worker::Worker;
pub use types::{Continuation, DeliveryCallback, Resume, StopReason, SubscriptionHandle};
