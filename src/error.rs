//! Error types for the message bus.

use thiserror::Error;

/// Main error type for bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Malformed cursor: {0}")]
    MalformedCursor(String),

    #[error("Invalid offset {offset:?} for key {key:?} in cursor")]
    InvalidCursorOffset { key: String, offset: String },

    #[error("Failed to start delivery worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("Message bus has been shut down")]
    BusShutDown,
}

impl BusError {
    /// True for both cursor parse failures.
    ///
    /// Callers holding a bad cursor must resubscribe from scratch.
    pub fn is_malformed_cursor(&self) -> bool {
        matches!(
            self,
            BusError::MalformedCursor(_) | BusError::InvalidCursorOffset { .. }
        )
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
