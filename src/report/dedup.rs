//! Insertion-ordered set used to collapse repeated error lines

use std::collections::HashMap;

/// Keeps the first-seen order of distinct keys and how often each was seen
#[derive(Debug, Clone, Default)]
pub struct OrderedSet {
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl OrderedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence; returns true if the key was new
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        let key = key.into();
        match self.counts.get_mut(&key) {
            Some(count) => {
                *count += 1;
                false
            }
            None => {
                self.counts.insert(key.clone(), 1);
                self.order.push(key);
                true
            }
        }
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Distinct keys in first-seen order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.order.iter().map(|k| (k.as_str(), self.counts[k]))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Occurrences across all keys
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}
