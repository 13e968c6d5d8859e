// src/cache/mru.rs

use std::hash::Hash;

use crate::cache::lru::UsageList;
use crate::cache::{Cache, CacheMiss};

/// Most recently used: same bookkeeping as [`crate::cache::LruCache`], but
/// eviction removes the most recently used key.
#[derive(Debug, Clone)]
pub struct MruCache<K, V> {
    capacity: usize,
    list: UsageList<K, V>,
}

impl<K: Hash + Eq + Clone, V> MruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            list: UsageList::with_capacity(capacity),
        }
    }

    fn evict(&mut self) {
        while self.list.len() > 0 && self.list.len() + 1 > self.capacity {
            self.list.pop_most_recent();
        }
    }
}

impl<K: Hash + Eq + Clone, V> Cache<K, V> for MruCache<K, V> {
    fn add(&mut self, key: K, value: V) {
        if self.list.contains(&key) {
            return;
        }
        self.evict();
        if self.capacity == 0 {
            return;
        }
        self.list.push_most_recent(key, value);
    }

    fn get(&mut self, key: &K) -> Result<&V, CacheMiss> {
        self.list.touch(key).ok_or(CacheMiss)
    }

    fn contains(&self, key: &K) -> bool {
        self.list.contains(key)
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
