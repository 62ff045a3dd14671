//! Recently seen notification ids
//!
//! The phone may deliver the same notification over several transports, so
//! the last few ids are remembered and repeats are dropped. Ids are compared
//! without the device id, so two devices reusing an id inside the window
//! will suppress each other.

use std::collections::VecDeque;

/// Number of ids remembered by default
pub const DEFAULT_WINDOW: usize = 20;

/// Bounded FIFO of notification ids
#[derive(Debug, Clone)]
pub struct RecentIds {
    ids: VecDeque<String>,
    capacity: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ids: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|seen| seen == id)
    }

    /// Record `id`, returning false if it was already in the window
    ///
    /// A repeat does not refresh its position.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        self.ids.push_back(id.to_string());
        if self.ids.len() > self.capacity {
            self.ids.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl Default for RecentIds {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_is_rejected() {
        let mut recent = RecentIds::default();
        assert!(recent.insert("1"));
        assert!(!recent.insert("1"));
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_keeps_most_recent_twenty() {
        let mut recent = RecentIds::default();
        for i in 0..25 {
            assert!(recent.insert(&i.to_string()));
            assert!(recent.len() <= DEFAULT_WINDOW);
        }

        let kept: Vec<&str> = recent.iter().collect();
        let expected: Vec<String> = (5..25).map(|i| i.to_string()).collect();
        assert_eq!(kept, expected);
        assert!(!recent.contains("4"));
    }

    #[test]
    fn test_twenty_first_id_evicts_oldest() {
        let mut recent = RecentIds::default();
        for i in 0..20 {
            recent.insert(&format!("id-{}", i));
        }
        assert!(recent.contains("id-0"));

        recent.insert("id-20");
        assert!(!recent.contains("id-0"));
        assert!(recent.contains("id-1"));
        // Evicted ids are accepted again
        assert!(recent.insert("id-0"));
    }

    #[test]
    fn test_repeat_does_not_refresh_position() {
        let mut recent = RecentIds::new(2);
        recent.insert("a");
        recent.insert("b");
        recent.insert("a");
        recent.insert("c");
        assert!(!recent.contains("a"));
        assert!(recent.contains("b"));
        assert!(recent.contains("c"));
    }
}
