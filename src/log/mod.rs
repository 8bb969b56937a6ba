//! Per-key message logs.
//!
//! Each event key owns an in-memory, offset-addressed log with a bounded
//! retention window and a registry of subscriptions waiting on it.

mod key_log;
mod table;

pub use key_log::{KeyLog, KeyWaiter};
pub use table::KeyLogTable;
