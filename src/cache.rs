//! Capacity-bounded record caches.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A map holding at most `capacity` entries.
///
/// Inserting a new key into a full cache evicts the oldest inserted entry.
/// Re-inserting an existing key replaces its value and makes it the newest.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    /// Create a cache.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be at least 1");
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Insert an entry, returning the evicted `(key, value)` if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.order.retain(|k| k != &key);
            self.order.push_back(key);
            return None;
        }

        self.order.push_back(key);
        if self.order.len() > self.capacity {
            let oldest = self.order.pop_front()?;
            let value = self.entries.remove(&oldest)?;
            return Some((oldest, value));
        }

        None
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
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

    /// Keys from oldest to newest.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut cache = BoundedCache::new(5);
        for seq in 1u16..=5 {
            assert!(cache.insert(seq, seq * 10).is_none());
        }
        assert_eq!(cache.len(), 5);

        assert_eq!(cache.insert(6, 60), Some((1, 10)));
        assert_eq!(cache.len(), 5);
        assert!(!cache.contains(&1));
        assert_eq!(cache.get(&6), Some(&60));
        assert_eq!(cache.keys().copied().collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_reinsert_refreshes() {
        let mut cache = BoundedCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert!(cache.insert("a", 3).is_none());
        assert_eq!(cache.insert("c", 4), Some(("b", 2)));
        assert_eq!(cache.get(&"a"), Some(&3));
    }

    #[test]
    fn test_single_entry_cache() {
        let mut cache = BoundedCache::new(1);
        cache.insert(1, "one");
        assert_eq!(cache.insert(2, "two"), Some((1, "one")));
        assert_eq!(cache.remove(&2), Some("two"));
        assert!(cache.is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn test_zero_capacity_panics() {
        let _ = BoundedCache::<u8, u8>::new(0);
    }
}
