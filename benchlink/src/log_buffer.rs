//! Bounded store for worker output.

use std::collections::VecDeque;

use crate::config::DEFAULT_LOG_CAPACITY;

/// Fixed-capacity, insertion-ordered log.
///
/// When full, the oldest entry is evicted before the new one is appended.
#[derive(Debug, Clone)]
pub struct LogRingBuffer {
    entries: VecDeque<String>,
    capacity: usize,
}

impl LogRingBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
