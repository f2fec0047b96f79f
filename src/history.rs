//! Bounded, most-recent-first list of completed results.

use crate::task::HistoryEntry;
use std::collections::VecDeque;

/// Fixed-capacity history. New entries go to the front; once the ring is
/// full the oldest entries fall off the back.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert at the front and drop whatever no longer fits.
    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    /// Copy of the first `limit` entries (all of them when `None`).
    pub fn snapshot(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let n = limit.unwrap_or(self.entries.len());
        self.entries.iter().take(n).cloned().collect()
    }
}
