// src/cache/lifo.rs

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use crate::cache::{Cache, CacheMiss};

/// Last in, first out: evicts the most recently inserted key.
#[derive(Debug, Clone)]
pub struct LifoCache<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    items: HashMap<K, V>,
}

impl<K: Hash + Eq + Clone, V> LifoCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            items: HashMap::with_capacity(capacity),
        }
    }

    fn evict(&mut self) {
        while !self.order.is_empty() && self.order.len() + 1 > self.capacity {
            if let Some(newest) = self.order.pop_back() {
                self.items.remove(&newest);
            }
        }
    }
}

impl<K: Hash + Eq + Clone, V> Cache<K, V> for LifoCache<K, V> {
    fn add(&mut self, key: K, value: V) {
        if self.items.contains_key(&key) {
            return;
        }
        self.evict();
        if self.capacity == 0 {
            return;
        }
        self.order.push_back(key.clone());
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
    fn evicts_newest() {
        let mut cache = LifoCache::new(2);
        cache.add("a", 1);
        cache.add("b", 2);
        cache.add("c", 3);

        assert_eq!(cache.get(&"a"), Ok(&1));
        assert_eq!(cache.get(&"b"), Err(CacheMiss));
        assert_eq!(cache.get(&"c"), Ok(&3));

        cache.add("d", 4);
        assert!(!cache.contains(&"c"));
        assert!(cache.contains(&"a"));
        assert!(cache.contains(&"d"));
    }
}
