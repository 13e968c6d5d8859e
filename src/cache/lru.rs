// src/cache/lru.rs

use std::collections::HashMap;
use std::hash::Hash;

use crate::cache::{Cache, CacheMiss};

#[derive(Debug, Clone)]
struct Record<K, V> {
    key: K,
    value: V,
    /// Towards the least recently used end.
    prev: Option<usize>,
    /// Towards the most recently used end.
    next: Option<usize>,
}

/// Doubly linked usage list over a slot arena, plus a key index.
///
/// `head` is the least recently used record, `tail` the most recently used.
/// Shared by [`LruCache`] and [`crate::cache::MruCache`], which only differ
/// in the end they evict from.
#[derive(Debug, Clone)]
pub(crate) struct UsageList<K, V> {
    slots: Vec<Option<Record<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> UsageList<K, V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            index: HashMap::with_capacity(capacity),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Append as most recently used. The caller guarantees `key` is absent.
    pub(crate) fn push_most_recent(&mut self, key: K, value: V) {
        let record = Record {
            key: key.clone(),
            value,
            prev: self.tail,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(record);
                slot
            }
            None => {
                self.slots.push(Some(record));
                self.slots.len() - 1
            }
        };
        if let Some(tail) = self.tail {
            self.record_mut(tail).next = Some(slot);
        }
        self.tail = Some(slot);
        if self.head.is_none() {
            self.head = Some(slot);
        }
        self.index.insert(key, slot);
    }

    /// Look up `key`, marking it most recently used.
    pub(crate) fn touch(&mut self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.unlink(slot);
        self.link_most_recent(slot);
        self.slots[slot].as_ref().map(|r| &r.value)
    }

    pub(crate) fn pop_least_recent(&mut self) -> Option<(K, V)> {
        let slot = self.head?;
        Some(self.remove_slot(slot))
    }

    pub(crate) fn pop_most_recent(&mut self) -> Option<(K, V)> {
        let slot = self.tail?;
        Some(self.remove_slot(slot))
    }

    /// Keys from least to most recently used.
    #[cfg(test)]
    pub(crate) fn keys_by_usage(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let record = self.slots[slot].as_ref().expect("linked slot is occupied");
            keys.push(record.key.clone());
            cursor = record.next;
        }
        keys
    }

    fn record_mut(&mut self, slot: usize) -> &mut Record<K, V> {
        self.slots[slot]
            .as_mut()
            .expect("linked slot is occupied")
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let record = self.record_mut(slot);
            (record.prev.take(), record.next.take())
        };
        match prev {
            Some(prev) => self.record_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.record_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }

    fn link_most_recent(&mut self, slot: usize) {
        let old_tail = self.tail;
        {
            let record = self.record_mut(slot);
            record.prev = old_tail;
            record.next = None;
        }
        match old_tail {
            Some(tail) => self.record_mut(tail).next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn remove_slot(&mut self, slot: usize) -> (K, V) {
        self.unlink(slot);
        let record = self.slots[slot].take().expect("linked slot is occupied");
        self.free.push(slot);
        self.index.remove(&record.key);
        (record.key, record.value)
    }
}

/// Least recently used: `get` refreshes recency, eviction removes the least
/// recently used key.
///
/// `add` on a key that is already cached does not refresh its recency; only
/// `get` does.
#[derive(Debug, Clone)]
pub struct LruCache<K, V> {
    capacity: usize,
    list: UsageList<K, V>,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            list: UsageList::with_capacity(capacity),
        }
    }

    fn evict(&mut self) {
        while self.list.len() > 0 && self.list.len() + 1 > self.capacity {
            self.list.pop_least_recent();
        }
    }
}

impl<K: Hash + Eq + Clone, V> Cache<K, V> for LruCache<K, V> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.add("a", 1);
        cache.add("b", 2);
        cache.add("c", 3);
        assert!(!cache.contains(&"a"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn get_protects_key() {
        let mut cache = LruCache::new(2);
        cache.add("a", 1);
        cache.add("b", 2);
        assert_eq!(cache.get(&"a"), Ok(&1));
        cache.add("c", 3);
        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
    }

    #[test]
    fn add_does_not_refresh_recency() {
        let mut cache = LruCache::new(2);
        cache.add("a", 1);
        cache.add("b", 2);
        cache.add("a", 100);
        cache.add("c", 3);
        assert!(!cache.contains(&"a"));
    }

    #[test]
    fn usage_list_reuses_slots() {
        let mut list = UsageList::with_capacity(2);
        list.push_most_recent("a", 1);
        list.push_most_recent("b", 2);
        list.push_most_recent("c", 3);
        assert_eq!(list.touch(&"a"), Some(&1));
        assert_eq!(list.keys_by_usage(), vec!["b", "c", "a"]);

        assert_eq!(list.pop_least_recent(), Some(("b", 2)));
        assert_eq!(list.pop_most_recent(), Some(("a", 1)));
        list.push_most_recent("d", 4);
        assert_eq!(list.keys_by_usage(), vec!["c", "d"]);
        assert_eq!(list.slots.len(), 3);
    }
}
