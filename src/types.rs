//! Core types for the message bus.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Position of a message within its key's log.
///
/// Offsets are zero-based and global within a key: they keep increasing
/// even after older entries have been evicted.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Offset(pub u64);

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl Offset {
    pub fn next(self) -> Self {
        Offset(self.0 + 1)
    }

    /// Offset `n` positions further along.
    pub fn advance(self, n: usize) -> Self {
        Offset(self.0 + n as u64)
    }
}

/// A single published event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Provenance supplied by the publisher. Opaque to the bus.
    pub source: String,

    /// Event key (topic) the message was published under.
    pub key: String,

    pub value: String,

    /// Set when this message carries a command.
    pub command_id: Option<String>,

    /// True when this message acknowledges a command.
    pub is_ack: bool,
}

impl Message {
    pub fn new(
        source: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
            value: value.into(),
            command_id: None,
            is_ack: false,
        }
    }

    /// Message carrying a command with the given id.
    pub fn command(
        source: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
        command_id: impl Into<String>,
    ) -> Self {
        Self {
            command_id: Some(command_id.into()),
            ..Self::new(source, key, value)
        }
    }

    /// Acknowledgement for a previously published command.
    pub fn ack(
        source: impl Into<String>,
        key: impl Into<String>,
        command_id: impl Into<String>,
    ) -> Self {
        Self {
            command_id: Some(command_id.into()),
            is_ack: true,
            ..Self::new(source, key, "")
        }
    }

    pub fn is_command(&self) -> bool {
        self.command_id.is_some()
    }
}

/// Contiguous run of messages read from one key's log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeySegment {
    pub key: String,

    /// Offset of the first message in `messages`.
    pub offset: Offset,

    pub messages: Vec<Arc<Message>>,
}

impl KeySegment {
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Offset one past the last message in this segment.
    pub fn end_offset(&self) -> Offset {
        self.offset.advance(self.messages.len())
    }
}

/// One delivery batch handed to a subscription callback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageResult {
    /// Per-key segments; within a segment messages are in append order.
    pub segments: Vec<KeySegment>,

    /// Serialized position of the subscription after this batch.
    pub cursor: String,

    /// Set on the final result of a subscription. Carries no messages.
    pub terminal: bool,
}

impl MessageResult {
    pub(crate) fn batch(segments: Vec<KeySegment>, cursor: String) -> Self {
        Self {
            segments,
            cursor,
            terminal: false,
        }
    }

    pub(crate) fn terminal(cursor: String) -> Self {
        Self {
            segments: Vec::new(),
            cursor,
            terminal: true,
        }
    }

    /// All messages, segment by segment.
    pub fn messages(&self) -> impl Iterator<Item = &Message> + '_ {
        self.segments
            .iter()
            .flat_map(|segment| segment.messages.iter().map(|m| m.as_ref()))
    }

    /// Total number of messages across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(KeySegment::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(KeySegment::is_empty)
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bus statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Number of key logs created so far.
    pub keys: usize,
    /// Live subscriptions.
    pub subscriptions: usize,
    /// Messages published since the bus was created.
    pub messages_published: u64,
}
