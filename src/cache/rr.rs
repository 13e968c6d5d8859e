// src/cache/rr.rs

use std::collections::HashMap;
use std::hash::Hash;

use rand::seq::IteratorRandom;

use crate::cache::{Cache, CacheMiss};

/// Random replacement: evicts a uniformly chosen key.
///
/// Choosing the victim walks the key set, so eviction is O(len).
#[derive(Debug, Clone)]
pub struct RrCache<K, V> {
    capacity: usize,
    items: HashMap<K, V>,
}

impl<K: Hash + Eq + Clone, V> RrCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: HashMap::with_capacity(capacity),
        }
    }

    fn evict(&mut self) {
        let mut rng = rand::thread_rng();
        while !self.items.is_empty() && self.items.len() + 1 > self.capacity {
            let Some(victim) = self.items.keys().choose(&mut rng).cloned() else {
                break;
            };
            self.items.remove(&victim);
        }
    }
}

impl<K: Hash + Eq + Clone, V> Cache<K, V> for RrCache<K, V> {
    fn add(&mut self, key: K, value: V) {
        if self.items.contains_key(&key) {
            return;
        }
        self.evict();
        if self.capacity == 0 {
            return;
        }
        self.items.insert(key, value);
    }

    fn get(&mut self, key: &K) -> Result<&V, CacheMiss> {
        self.items.get(key).ok_or(CacheMiss)
    }

    fn contains(&self, key: &K) -> bool {
        self.items.contains_key(key)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_exactly_one_key_per_overflow() {
        let mut cache = RrCache::new(3);
        for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
            cache.add(key, i);
        }
        cache.add("d", 3);

        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&"d"));
        let survivors = ["a", "b", "c"]
            .iter()
            .filter(|k| cache.contains(k))
            .count();
        assert_eq!(survivors, 2);
    }
}
