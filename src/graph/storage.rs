// src/graph/storage.rs

use serde_json::Value;

use crate::cache::CacheSpec;
use crate::config::StorageConfig;
use crate::errors::Result;

/// Result storage declaration. The adapter itself lives outside the
/// compiler; only its identity, configuration and cache are recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct Storage {
    pub name: String,
    pub class_name: String,
    pub import: String,
    pub configuration: Value,
    pub cache: Option<CacheSpec>,
}

impl Storage {
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        let cache = cfg
            .cache
            .as_ref()
            .map(|c| CacheSpec::from_config(c, &format!("storage '{}'", cfg.name)))
            .transpose()?;

        Ok(Self {
            name: cfg.name.clone(),
            class_name: cfg.classname.clone().unwrap_or_else(|| cfg.name.clone()),
            import: cfg.import.clone(),
            configuration: serde_json::to_value(&cfg.configuration)?,
            cache,
        })
    }
}
