//! # pushbus
//!
//! An in-process, multi-key message bus for real-time push to many
//! concurrently connected subscribers.
//!
//! ## Core Concepts
//!
//! - **Key logs**: One bounded, append-only log per event key with stable
//!   offsets that survive eviction
//! - **Cursors**: Serialized per-key positions (`key,0000002a|other,00000003`)
//!   so a reconnecting client resumes without gaps or duplicates
//! - **Subscriptions**: A subscriber's dynamic key set bound to a callback,
//!   fed in ordered batches by a dedicated worker
//!
//! ## Example
//!
//! ```ignore
//! use pushbus::{Continuation, LocalSubscriber, MessageBus, MessageResult};
//! use std::sync::Arc;
//!
//! let bus = MessageBus::new();
//! let client = Arc::new(LocalSubscriber::with_keys(["chat"]));
//!
//! let handle = bus.subscribe(client.clone(), None, |result: MessageResult| {
//!     for message in result.messages() {
//!         println!("{} -> {}", message.key, message.value);
//!     }
//!     Continuation::from(!result.terminal)
//! }, 10)?;
//!
//! bus.publish("server", "chat", "hello");
//!
//! // Join another key without resubscribing
//! client.add_event("presence");
//!
//! // Hand this to the client for resume after reconnect
//! let cursor = handle.cursor();
//! ```

pub mod bus;
pub mod cursor;
pub mod error;
pub mod log;
pub mod subscriber;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use bus::{BusConfig, MessageBus};
pub use cursor::Cursor;
pub use error::{BusError, Result};
pub use log::{KeyLog, KeyLogTable, KeyWaiter};
pub use subscriber::{KeyChange, KeyListener, LocalSubscriber, Subscriber};
pub use subscriptions::{Continuation, DeliveryCallback, Resume, StopReason, SubscriptionHandle};
pub use types::*;
