//! Lookup table of key logs.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::KeyLog;

/// All key logs of a bus, created lazily and never removed.
pub struct KeyLogTable {
    capacity: usize,
    logs: RwLock<HashMap<String, Arc<KeyLog>>>,
}

impl KeyLogTable {
    /// Logs created by this table retain up to `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Existing log for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<KeyLog>> {
        self.logs.read().get(key).cloned()
    }

    /// Log for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &str) -> Arc<KeyLog> {
        if let Some(log) = self.get(key) {
            return log;
        }

        let mut logs = self.logs.write();
        Arc::clone(logs.entry(key.to_string()).or_insert_with(|| {
            tracing::trace!(key = %key, capacity = self.capacity, "creating key log");
            Arc::new(KeyLog::new(key, self.capacity))
        }))
    }

    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.read().is_empty()
    }
}
