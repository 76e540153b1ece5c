//! In-process healing log: a bounded ring of the most recent entries.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::HealingLogEntry;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Append-only (from the reader's point of view) healing history.
#[derive(Clone)]
pub struct HealingLog {
    entries: Arc<RwLock<VecDeque<HealingLogEntry>>>,
    capacity: usize,
}

impl Default for HealingLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl HealingLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity,
        }
    }

    pub fn append(&self, entry: HealingLogEntry) {
        let mut entries = self.entries.write();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<HealingLogEntry> {
        self.entries.read().iter().rev().take(limit).cloned().collect()
    }

    /// Entries for one device, oldest first.
    pub fn for_device(&self, ip: &str) -> Vec<HealingLogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.ip == ip)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
