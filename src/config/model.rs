// src/config/model.rs

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{FlowdagError, Result};

/// The nodes document: declares every task, storage and flow name, plus the
/// `[global]` section.
///
/// ```toml
/// flows = ["main"]
///
/// [global]
/// default_task_queue = "tasks"
///
/// [[tasks]]
/// name = "A"
/// import = "app.tasks"
/// storage = "Redis"
///
/// [[storages]]
/// name = "Redis"
/// import = "app.storages"
/// cache = { name = "LRU", options = { max_cache_size = 16 } }
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NodesDocument {
    /// Names of all flows; each must be defined in exactly one flow document.
    #[serde(default)]
    pub flows: Vec<String>,

    #[serde(default)]
    pub global: GlobalSection,

    #[serde(default)]
    pub tasks: Vec<TaskConfig>,

    #[serde(default)]
    pub storages: Vec<StorageConfig>,
}

/// `[global]` section.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalSection {
    /// Module predicates are resolved in when a leaf does not name one.
    #[serde(default)]
    pub predicates_module: Option<String>,

    #[serde(default)]
    pub default_task_queue: Option<String>,

    #[serde(default)]
    pub default_dispatcher_queue: Option<String>,

    /// Names of registered trace sinks.
    #[serde(default)]
    pub trace: Vec<String>,

    #[serde(default)]
    pub migration_dir: Option<String>,
}

/// `[[tasks]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub name: String,

    /// Module the task class lives in.
    pub import: String,

    /// Class implementing the task; defaults to the task name.
    #[serde(default)]
    pub classname: Option<String>,

    #[serde(default)]
    pub storage: Option<String>,

    /// When true the task does not write results, so no predicate may
    /// inspect them.
    #[serde(default)]
    pub storage_readonly: bool,

    /// Name results are stored under; defaults to the task name.
    #[serde(default)]
    pub storage_task_name: Option<String>,

    #[serde(default)]
    pub max_retry: u32,

    #[serde(default)]
    pub retry_countdown: u32,

    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub throttling: Option<DurationConfig>,

    #[serde(default)]
    pub selective_run_function: Option<FunctionRefConfig>,

    #[serde(default)]
    pub output_schema: Option<String>,
}

/// `[[storages]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub name: String,

    pub import: String,

    #[serde(default)]
    pub classname: Option<String>,

    /// Opaque backend configuration handed to the storage adapter.
    #[serde(default)]
    pub configuration: toml::Table,

    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

/// Cache declaration, shared by storages and flows.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Policy name: `FIFO`, `LIFO`, `LRU`, `MRU` or `RR`.
    pub name: String,

    #[serde(default)]
    pub import: Option<String>,

    #[serde(default)]
    pub options: toml::Table,
}

/// Reference to a function in the registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionRefConfig {
    pub name: String,

    pub import: String,
}

/// `{ days = 1, hours = 2, minutes = 3, seconds = 4 }`
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DurationConfig {
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

impl DurationConfig {
    /// Total length; `owner` names the task or flow in the overflow error.
    pub fn to_duration(self, owner: &str) -> Result<Duration> {
        self.days
            .checked_mul(86_400)
            .zip(self.hours.checked_mul(3_600))
            .zip(self.minutes.checked_mul(60))
            .and_then(|((d, h), m)| d.checked_add(h)?.checked_add(m)?.checked_add(self.seconds))
            .map(Duration::from_secs)
            .ok_or_else(|| FlowdagError::config(format!("{owner}: throttling duration is too large")))
    }
}

/// A flow document holding one or more flow definitions.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FlowDocument {
    #[serde(rename = "flow-definitions", default)]
    pub flow_definitions: Vec<FlowDefinition>,
}

/// `[[flow-definitions]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowDefinition {
    pub name: String,

    #[serde(default)]
    pub edges: Vec<EdgeConfig>,

    #[serde(default)]
    pub failures: Vec<FailureConfig>,

    /// Nodes the flow does not wait for.
    #[serde(default)]
    pub nowait: OneOrMany,

    /// Nodes whose failure stops the flow immediately.
    #[serde(default)]
    pub eager_failures: OneOrMany,

    #[serde(default)]
    pub cache: Option<CacheConfig>,

    #[serde(default)]
    pub sampling: Option<StrategyConfig>,

    #[serde(default)]
    pub throttling: Option<DurationConfig>,

    #[serde(default)]
    pub propagate_node_args: Propagate,
    #[serde(default)]
    pub propagate_parent: Propagate,
    #[serde(default)]
    pub propagate_parent_failures: Propagate,
    #[serde(default)]
    pub propagate_finished: Propagate,
    #[serde(default)]
    pub propagate_compound_finished: Propagate,
    #[serde(default)]
    pub propagate_failures: Propagate,
    #[serde(default)]
    pub propagate_compound_failures: Propagate,

    /// Use the result of the single starting node as the flow arguments.
    #[serde(default)]
    pub node_args_from_first: bool,

    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub max_retry: u32,

    #[serde(default)]
    pub retry_countdown: u32,
}

/// `[[flow-definitions.edges]]` entry.
///
/// `from` is optional at the serde level so that a missing key is reported
/// with the flow name instead of a bare deserialization error.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    #[serde(default)]
    pub from: Option<OneOrMany>,

    #[serde(default)]
    pub to: Option<OneOrMany>,

    #[serde(default)]
    pub condition: Option<toml::Value>,

    #[serde(default)]
    pub foreach: Option<ForeachConfig>,

    #[serde(default)]
    pub selective: Option<SelectiveConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForeachConfig {
    pub function: String,

    pub import: String,

    /// Hand each iteration item to the destination flows as node arguments.
    #[serde(default)]
    pub propagate_result: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectiveConfig {
    pub tasks: OneOrMany,

    /// Also run dependents of the selected tasks; `true` for all flows,
    /// or a list restricting it to the named sub-flows.
    #[serde(default)]
    pub run_subsequent: Propagate,

    #[serde(default)]
    pub follow_subflows: bool,
}

/// `[[flow-definitions.failures]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailureConfig {
    pub nodes: OneOrMany,

    pub fallback: FallbackConfig,

    #[serde(default)]
    pub propagate_failure: bool,

    #[serde(default)]
    pub condition: Option<toml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FallbackConfig {
    Flag(bool),
    Nodes(OneOrMany),
}

/// `sampling = { name = "constant", args = { retry = 5 } }`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub name: String,

    #[serde(default)]
    pub import: Option<String>,

    #[serde(default)]
    pub args: toml::Table,
}

/// A single name or a list of names.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OneOrMany::One(_) => false,
            OneOrMany::Many(v) => v.is_empty(),
        }
    }
}

impl From<Vec<&str>> for OneOrMany {
    fn from(v: Vec<&str>) -> Self {
        OneOrMany::Many(v.into_iter().map(str::to_string).collect())
    }
}

/// Propagation flag: `false`, `true`, or an explicit list of node names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Propagate {
    Flag(bool),
    Nodes(BTreeSet<String>),
}

impl Default for Propagate {
    fn default() -> Self {
        Propagate::Flag(false)
    }
}

impl Propagate {
    /// Whether the flag is in effect for `node`.
    pub fn applies_to(&self, node: &str) -> bool {
        match self {
            Propagate::Flag(flag) => *flag,
            Propagate::Nodes(nodes) => nodes.contains(node),
        }
    }

    /// `true` unless the flag is `false` or an empty list.
    pub fn is_set(&self) -> bool {
        match self {
            Propagate::Flag(flag) => *flag,
            Propagate::Nodes(nodes) => !nodes.is_empty(),
        }
    }

    /// Explicitly named nodes; empty for the boolean forms.
    pub fn named_nodes(&self) -> impl Iterator<Item = &str> {
        let nodes = match self {
            Propagate::Flag(_) => None,
            Propagate::Nodes(nodes) => Some(nodes),
        };
        nodes.into_iter().flatten().map(String::as_str)
    }
}
