//! Bounded FIFO logs.

use std::collections::VecDeque;

use serde::{Serialize, Serializer};

/// A fixed-capacity FIFO: pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    /// Create an empty log. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        BoundedLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, returning the evicted oldest entry if the log was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
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

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The most recently pushed entry.
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> BoundedLog<T> {
    /// Copy the entries out, newest first (display order).
    pub fn newest_first(&self) -> Vec<T> {
        self.entries.iter().rev().cloned().collect()
    }
}

impl<T: Serialize> Serialize for BoundedLog<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut log = BoundedLog::new(3);
        assert!(log.push(1).is_none());
        assert!(log.push(2).is_none());
        assert_eq!(log.len(), 2);
        assert_eq!(log.latest(), Some(&2));
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut log = BoundedLog::new(50);
        for i in 0..75 {
            log.push(i);
            assert!(log.len() <= 50);
        }
        assert_eq!(log.len(), 50);
        assert_eq!(log.iter().next(), Some(&25));
        assert_eq!(log.latest(), Some(&74));
        assert_eq!(log.push(75), Some(25));
    }

    #[test]
    fn test_newest_first() {
        let mut log = BoundedLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.newest_first(), vec!["c", "b"]);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut log = BoundedLog::new(0);
        log.push(1);
        log.push(2);
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.latest(), Some(&2));
    }

    #[test]
    fn test_serializes_as_sequence() {
        let mut log = BoundedLog::new(4);
        log.push(1);
        log.push(2);
        assert_eq!(serde_json::to_string(&log).unwrap(), "[1,2]");
    }
}
