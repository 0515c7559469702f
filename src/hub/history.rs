// Bounded history of recent broadcasts

use std::collections::VecDeque;

/// Bounded FIFO of the most recent broadcast payloads
///
/// Holds at most `capacity` entries. When full, the oldest entry is evicted
/// before the new one is appended, so the buffer always contains the latest
/// `capacity` payloads in arrival order.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
}

impl History {
    /// Create an empty history with the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a payload, evicting the oldest entries if at capacity
    pub fn push(&mut self, payload: String) {
        if self.capacity == 0 {
            return;
        }

        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }

        self.entries.push_back(payload);
    }

    /// Iterate over the payloads, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
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

    /// Copy of the current contents, oldest first
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }
}
