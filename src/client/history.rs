//! Bounded newest-first history buffers

use std::collections::VecDeque;

/// Inbound message history capacity
pub const MESSAGE_HISTORY_CAPACITY: usize = 1000;

/// Log history capacity
pub const LOG_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity sequence ordered newest first
///
/// Pushing past capacity evicts from the tail, so the buffer always holds the
/// most recent `capacity` entries.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.front()
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

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> BoundedHistory<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn holds_most_recent_entries_newest_first(count in 0usize..2500) {
            let mut history = BoundedHistory::new(MESSAGE_HISTORY_CAPACITY);
            for i in 0..count {
                history.push(i);
            }

            let expected: Vec<usize> = (0..count).rev().take(MESSAGE_HISTORY_CAPACITY).collect();
            prop_assert!(history.len() <= MESSAGE_HISTORY_CAPACITY);
            prop_assert_eq!(history.snapshot(), expected);
        }

        #[test]
        fn log_capacity_is_never_exceeded(count in 0usize..400) {
            let mut history = BoundedHistory::new(LOG_HISTORY_CAPACITY);
            for i in 0..count {
                history.push(i);
                prop_assert!(history.len() <= LOG_HISTORY_CAPACITY);
                prop_assert_eq!(history.latest(), Some(&i));
            }
        }
    }

    #[test]
    fn test_clear() {
        let mut history = BoundedHistory::new(3);
        history.push("a");
        history.push("b");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.capacity(), 3);
    }
}
