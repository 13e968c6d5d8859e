// tests/cache_laws.rs

use proptest::prelude::*;

use flowdag::cache::{Cache, CachePolicy, CacheSpec};

#[derive(Debug, Clone)]
enum Op {
    Add(u8),
    Get(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8).prop_map(Op::Add),
        (0u8..8).prop_map(Op::Get),
    ]
}

/// Reference model: a key order plus where eviction and `get` act on it.
struct Model {
    capacity: usize,
    order: Vec<u8>,
    evict_front: bool,
    get_moves_to_back: bool,
}

impl Model {
    fn new(policy: CachePolicy, capacity: usize) -> Self {
        let (evict_front, get_moves_to_back) = match policy {
            CachePolicy::Fifo => (true, false),
            CachePolicy::Lifo => (false, false),
            CachePolicy::Lru => (true, true),
            CachePolicy::Mru => (false, true),
            CachePolicy::Rr => unreachable!("random replacement has no deterministic model"),
        };
        Self {
            capacity,
            order: Vec::new(),
            evict_front,
            get_moves_to_back,
        }
    }

    fn add(&mut self, key: u8) {
        if self.order.contains(&key) {
            return;
        }
        while !self.order.is_empty() && self.order.len() + 1 > self.capacity {
            if self.evict_front {
                self.order.remove(0);
            } else {
                self.order.pop();
            }
        }
        if self.capacity > 0 {
            self.order.push(key);
        }
    }

    fn get(&mut self, key: u8) -> bool {
        let Some(pos) = self.order.iter().position(|k| *k == key) else {
            return false;
        };
        if self.get_moves_to_back {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
        true
    }
}

fn check_against_model(policy: CachePolicy, capacity: usize, ops: &[Op]) {
    let mut cache = CacheSpec::new(policy, capacity).instantiate::<u8, u32>();
    let mut model = Model::new(policy, capacity);

    for op in ops {
        match *op {
            Op::Add(k) => {
                cache.add(k, u32::from(k) * 10);
                model.add(k);
            }
            Op::Get(k) => {
                let hit = model.get(k);
                match cache.get(&k) {
                    Ok(v) => {
                        assert!(hit, "{policy}: unexpected hit for {k}");
                        assert_eq!(*v, u32::from(k) * 10);
                    }
                    Err(_) => assert!(!hit, "{policy}: unexpected miss for {k}"),
                }
            }
        }
        assert_eq!(cache.len(), model.order.len(), "{policy} after {op:?}");
        for k in &model.order {
            assert!(cache.contains(k), "{policy}: {k} should be cached");
        }
    }
}

proptest! {
    #[test]
    fn deterministic_policies_follow_model(
        capacity in 0usize..5,
        ops in proptest::collection::vec(op_strategy(), 0..60),
    ) {
        for policy in [CachePolicy::Fifo, CachePolicy::Lifo, CachePolicy::Lru, CachePolicy::Mru] {
            check_against_model(policy, capacity, &ops);
        }
    }

    #[test]
    fn random_replacement_respects_capacity(
        capacity in 0usize..5,
        keys in proptest::collection::vec(0u8..16, 0..60),
    ) {
        let mut cache = CacheSpec::new(CachePolicy::Rr, capacity).instantiate::<u8, u8>();
        for k in keys {
            cache.add(k, k);
            prop_assert!(cache.len() <= capacity);
            if capacity > 0 {
                prop_assert!(cache.contains(&k));
                prop_assert_eq!(cache.get(&k), Ok(&k));
            } else {
                prop_assert!(cache.is_empty());
            }
        }
    }
}

#[test]
fn zero_capacity_never_stores() {
    for policy in [
        CachePolicy::Fifo,
        CachePolicy::Lifo,
        CachePolicy::Lru,
        CachePolicy::Mru,
        CachePolicy::Rr,
    ] {
        let mut cache = CacheSpec::new(policy, 0).instantiate::<&str, u32>();
        cache.add("a", 1);
        assert!(cache.is_empty(), "{policy}");
        assert!(cache.get(&"a").is_err(), "{policy}");
    }
}

#[test]
fn lru_add_does_not_refresh_recency() {
    let mut cache = CacheSpec::new(CachePolicy::Lru, 2).instantiate::<&str, u32>();
    cache.add("a", 1);
    cache.add("b", 2);
    // Re-adding "a" is a no-op, so "a" stays least recently used.
    cache.add("a", 10);
    cache.add("c", 3);

    assert!(!cache.contains(&"a"));
    assert_eq!(cache.get(&"b"), Ok(&2));
    assert_eq!(cache.get(&"c"), Ok(&3));
}

#[test]
fn lru_add_keeps_existing_value() {
    let mut cache = CacheSpec::new(CachePolicy::Lru, 2).instantiate::<&str, u32>();
    cache.add("a", 1);
    cache.add("a", 10);

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get(&"a"), Ok(&1));
}
