// src/cache/mod.rs

//! Bounded key/value caches with a fixed replacement policy.
//!
//! Used for task results fronting a storage and for async results of
//! in-flight sub-flows. None of the caches synchronize internally; each
//! instance has a single owner.
//!
//! All policies evict *before* inserting, trimming until `len + 1 <=
//! capacity`. Adding a key that is already present is a no-op, and a cache
//! of capacity 0 never stores anything.

pub mod fifo;
pub mod lifo;
pub mod lru;
pub mod mru;
pub mod rr;

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CacheConfig;
use crate::errors::{FlowdagError, Result};

pub use fifo::FifoCache;
pub use lifo::LifoCache;
pub use lru::LruCache;
pub use mru::MruCache;
pub use rr::RrCache;

/// Module name accepted in a cache declaration's `import`.
pub const CACHE_MODULE: &str = "flowdag.cache";

/// Requested key is not cached. An expected outcome, not a fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cache miss")]
pub struct CacheMiss;

pub trait Cache<K, V> {
    /// Insert `value` under `key`, evicting first if the cache is full.
    fn add(&mut self, key: K, value: V);

    /// Look up `key`. Takes `&mut self` because some policies record usage.
    fn get(&mut self, key: &K) -> std::result::Result<&V, CacheMiss>;

    fn contains(&self, key: &K) -> bool;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CachePolicy {
    Fifo,
    Lifo,
    Lru,
    Mru,
    Rr,
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        match normalized.trim_end_matches("CACHE") {
            "FIFO" => Ok(CachePolicy::Fifo),
            "LIFO" => Ok(CachePolicy::Lifo),
            "LRU" => Ok(CachePolicy::Lru),
            "MRU" => Ok(CachePolicy::Mru),
            "RR" => Ok(CachePolicy::Rr),
            _ => Err(format!(
                "invalid cache policy: {s} (expected FIFO, LIFO, LRU, MRU or RR)"
            )),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CachePolicy::Fifo => "FIFO",
            CachePolicy::Lifo => "LIFO",
            CachePolicy::Lru => "LRU",
            CachePolicy::Mru => "MRU",
            CachePolicy::Rr => "RR",
        })
    }
}

/// Resolved cache declaration, as stored in the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub policy: CachePolicy,
    pub max_cache_size: usize,
}

impl CacheSpec {
    pub fn new(policy: CachePolicy, max_cache_size: usize) -> Self {
        Self {
            policy,
            max_cache_size,
        }
    }

    /// Resolve a cache declaration; `owner` names the storage or flow for
    /// error messages.
    pub fn from_config(cfg: &CacheConfig, owner: &str) -> Result<Self> {
        if let Some(import) = cfg.import.as_deref() {
            if import != CACHE_MODULE {
                return Err(FlowdagError::config(format!(
                    "{owner}: cache '{}' imported from unknown module '{import}'",
                    cfg.name
                )));
            }
        }

        let policy = cfg
            .name
            .parse::<CachePolicy>()
            .map_err(|e| FlowdagError::config(format!("{owner}: {e}")))?;

        if let Some(unknown) = cfg.options.keys().find(|k| *k != "max_cache_size") {
            return Err(FlowdagError::config(format!(
                "{owner}: unknown cache option '{unknown}'"
            )));
        }

        let max_cache_size = match cfg.options.get("max_cache_size") {
            Some(toml::Value::Integer(n)) if *n >= 0 => usize::try_from(*n).map_err(|_| {
                FlowdagError::config(format!("{owner}: max_cache_size {n} is too large"))
            })?,
            Some(other) => {
                return Err(FlowdagError::config(format!(
                    "{owner}: max_cache_size must be a non-negative integer, got {other}"
                )));
            }
            None => {
                return Err(FlowdagError::config(format!(
                    "{owner}: cache '{}' requires option 'max_cache_size'",
                    cfg.name
                )));
            }
        };

        Ok(Self::new(policy, max_cache_size))
    }

    /// Build an empty cache with this policy and capacity.
    pub fn instantiate<K, V>(&self) -> Box<dyn Cache<K, V>>
    where
        K: Hash + Eq + Clone + 'static,
        V: 'static,
    {
        let cap = self.max_cache_size;
        match self.policy {
            CachePolicy::Fifo => Box::new(FifoCache::new(cap)),
            CachePolicy::Lifo => Box::new(LifoCache::new(cap)),
            CachePolicy::Lru => Box::new(LruCache::new(cap)),
            CachePolicy::Mru => Box::new(MruCache::new(cap)),
            CachePolicy::Rr => Box::new(RrCache::new(cap)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_config(src: &str) -> CacheConfig {
        toml::from_str(src).expect("valid cache config")
    }

    #[test]
    fn policy_names() {
        assert_eq!("lru".parse::<CachePolicy>(), Ok(CachePolicy::Lru));
        assert_eq!("FIFOCache".parse::<CachePolicy>(), Ok(CachePolicy::Fifo));
        assert!("LFU".parse::<CachePolicy>().is_err());
    }

    #[test]
    fn spec_from_config() {
        let cfg = cache_config("name = \"MRU\"\noptions = { max_cache_size = 3 }");
        let spec = CacheSpec::from_config(&cfg, "storage 'Redis'").unwrap();
        assert_eq!(spec, CacheSpec::new(CachePolicy::Mru, 3));

        let missing = cache_config("name = \"LRU\"");
        let err = CacheSpec::from_config(&missing, "storage 'Redis'").unwrap_err();
        assert!(err.to_string().contains("max_cache_size"));

        let unknown = cache_config("name = \"LRU\"\noptions = { max_cache_size = 1, ttl = 5 }");
        assert!(CacheSpec::from_config(&unknown, "flow 'main'").is_err());
    }

    #[test]
    fn instantiate_every_policy() {
        for policy in [
            CachePolicy::Fifo,
            CachePolicy::Lifo,
            CachePolicy::Lru,
            CachePolicy::Mru,
            CachePolicy::Rr,
        ] {
            let mut cache = CacheSpec::new(policy, 2).instantiate::<String, u32>();
            cache.add("a".to_string(), 1);
            cache.add("b".to_string(), 2);
            cache.add("c".to_string(), 3);
            assert_eq!(cache.len(), 2, "{policy}");
            assert_eq!(cache.get(&"c".to_string()), Ok(&3), "{policy}");
        }
    }
}
