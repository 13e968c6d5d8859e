// src/config/global.rs

use serde::{Deserialize, Serialize};

use crate::config::model::GlobalSection;
use crate::registry::PREDICATES_MODULE;

pub const DEFAULT_PREDICATES_MODULE: &str = PREDICATES_MODULE;
pub const DEFAULT_TASK_QUEUE: &str = "flowdag_tasks";
pub const DEFAULT_DISPATCHER_QUEUE: &str = "flowdag_dispatcher";

/// Resolved `[global]` settings.
///
/// Built once from the nodes document and passed by reference to everything
/// that needs a default queue or the predicates module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub predicates_module: String,
    pub default_task_queue: String,
    pub default_dispatcher_queue: String,
    pub trace_sinks: Vec<String>,
    pub migration_dir: Option<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            predicates_module: DEFAULT_PREDICATES_MODULE.to_string(),
            default_task_queue: DEFAULT_TASK_QUEUE.to_string(),
            default_dispatcher_queue: DEFAULT_DISPATCHER_QUEUE.to_string(),
            trace_sinks: Vec::new(),
            migration_dir: None,
        }
    }
}

impl From<&GlobalSection> for GlobalConfig {
    fn from(section: &GlobalSection) -> Self {
        let defaults = GlobalConfig::default();
        Self {
            predicates_module: section
                .predicates_module
                .clone()
                .unwrap_or(defaults.predicates_module),
            default_task_queue: section
                .default_task_queue
                .clone()
                .unwrap_or(defaults.default_task_queue),
            default_dispatcher_queue: section
                .default_dispatcher_queue
                .clone()
                .unwrap_or(defaults.default_dispatcher_queue),
            trace_sinks: section.trace.clone(),
            migration_dir: section.migration_dir.clone(),
        }
    }
}
