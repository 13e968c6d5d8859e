// src/system/dispatch.rs

//! The dispatch table: everything a dispatcher needs at run time, in a
//! serializable form.
//!
//! The table is plain data. Predicates and strategies are stored as
//! [`FunctionRef`]s with their arguments and are evaluated through a
//! [`FunctionRegistry`] supplied by the consumer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::CacheSpec;
use crate::config::{GlobalConfig, Propagate};
use crate::errors::{FlowdagError, Result};
use crate::graph::{
    FailureGraph, FallbackResolution, Flow, Foreach, Node, PredicateExpr, ResultSource, Storage,
    Strategy, Task,
};
use crate::registry::{FunctionRef, FunctionRegistry, StrategyCall};
use crate::system::System;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTable {
    /// blake3 hex digest of the table serialized with an empty fingerprint.
    pub fingerprint: String,
    pub global: GlobalConfig,
    pub flows: BTreeMap<String, FlowTable>,
    pub tasks: BTreeMap<String, TaskEntry>,
    pub storages: BTreeMap<String, StorageEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTable {
    /// Queue of the flow's dispatcher.
    pub queue: String,
    pub edges: Vec<EdgeEntry>,
    pub failures: FailureGraph,
    pub nowait: BTreeSet<String>,
    pub eager_failures: BTreeSet<String>,
    pub propagate_node_args: Propagate,
    pub propagate_parent: Propagate,
    pub propagate_parent_failures: Propagate,
    pub propagate_finished: Propagate,
    pub propagate_compound_finished: Propagate,
    pub propagate_failures: Propagate,
    pub propagate_compound_failures: Propagate,
    pub node_args_from_first: bool,
    pub throttling_secs: Option<u64>,
    pub sampling: Strategy,
    pub max_retry: u32,
    pub retry_countdown: u32,
    pub cache: Option<CacheSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeEntry {
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub condition: PredicateExpr,
    /// Rendered condition, for logs and summaries.
    pub condition_str: String,
    pub foreach: Option<Foreach>,
    pub selective: Option<SelectiveEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectiveEntry {
    pub tasks: Vec<String>,
    pub run_subsequent: Propagate,
    pub follow_subflows: bool,
    /// Edge indices to fire, per flow taking part in the selective run.
    pub plan: BTreeMap<String, Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub class_name: String,
    pub import: String,
    pub queue: String,
    pub storage: Option<String>,
    pub storage_readonly: bool,
    pub storage_task_name: String,
    pub max_retry: u32,
    pub retry_countdown: u32,
    pub throttling_secs: Option<u64>,
    pub selective_run_function: Option<FunctionRef>,
    pub output_schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub class_name: String,
    pub import: String,
    pub configuration: Value,
    pub cache: Option<CacheSpec>,
}

impl DispatchTable {
    pub fn from_system(system: &System) -> Result<Self> {
        let global = system.global();

        let flows = system
            .flows()
            .map(|flow| -> Result<(String, FlowTable)> {
                Ok((flow.name.clone(), FlowTable::from_flow(system, flow)?))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let tasks = system
            .tasks()
            .map(|task| (task.name.clone(), TaskEntry::from_task(task, global)))
            .collect();

        let storages = system
            .storages()
            .map(|s| (s.name.clone(), StorageEntry::from(s)))
            .collect();

        let mut table = Self {
            fingerprint: String::new(),
            global: global.clone(),
            flows,
            tasks,
            storages,
        };
        table.fingerprint = table.compute_fingerprint()?;

        debug!(fingerprint = %table.fingerprint, "emitted dispatch table");
        Ok(table)
    }

    fn compute_fingerprint(&self) -> Result<String> {
        let unsigned = Self {
            fingerprint: String::new(),
            ..self.clone()
        };
        let canonical = serde_json::to_vec(&unsigned)?;
        Ok(blake3::hash(&canonical).to_hex().to_string())
    }

    /// Whether the stored fingerprint matches the table's contents.
    pub fn verify_fingerprint(&self) -> Result<bool> {
        Ok(self.compute_fingerprint()? == self.fingerprint)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn flow(&self, name: &str) -> Option<&FlowTable> {
        self.flows.get(name)
    }

    pub fn task(&self, name: &str) -> Option<&TaskEntry> {
        self.tasks.get(name)
    }
}

impl FlowTable {
    fn from_flow(system: &System, flow: &Flow) -> Result<Self> {
        let edges = flow
            .edges
            .iter()
            .map(|edge| -> Result<EdgeEntry> {
                let selective = match &edge.selective {
                    Some(sel) => {
                        let target = edge.nodes_to.first().map(String::as_str).unwrap_or_default();
                        Some(SelectiveEntry {
                            plan: system.selective_plan(
                                target,
                                &sel.tasks,
                                &sel.run_subsequent,
                                sel.follow_subflows,
                            )?,
                            tasks: sel.tasks.clone(),
                            run_subsequent: sel.run_subsequent.clone(),
                            follow_subflows: sel.follow_subflows,
                        })
                    }
                    None => None,
                };
                Ok(EdgeEntry {
                    from: edge.nodes_from.clone(),
                    to: edge.nodes_to.clone(),
                    condition: edge.predicate.to_expr(),
                    condition_str: edge.predicate.to_string(),
                    foreach: edge.foreach.clone(),
                    selective,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            queue: Node::Flow(flow).queue_name(system.global()).to_string(),
            edges,
            failures: flow.failures.clone(),
            nowait: flow.nowait.clone(),
            eager_failures: flow.eager_failures.clone(),
            propagate_node_args: flow.propagate_node_args.clone(),
            propagate_parent: flow.propagate_parent.clone(),
            propagate_parent_failures: flow.propagate_parent_failures.clone(),
            propagate_finished: flow.propagate_finished.clone(),
            propagate_compound_finished: flow.propagate_compound_finished.clone(),
            propagate_failures: flow.propagate_failures.clone(),
            propagate_compound_failures: flow.propagate_compound_failures.clone(),
            node_args_from_first: flow.node_args_from_first,
            throttling_secs: flow.throttling.map(|d| d.as_secs()),
            sampling: flow.sampling.clone(),
            max_retry: flow.max_retry,
            retry_countdown: flow.retry_countdown,
            cache: flow.cache,
        })
    }

    pub fn starting_edges(&self) -> impl Iterator<Item = (usize, &EdgeEntry)> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.from.is_empty())
    }

    /// Edges that wait on `node`.
    pub fn edges_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = (usize, &'a EdgeEntry)> {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.from.iter().any(|n| n == node))
    }

    /// Evaluate the condition of edge `index`.
    ///
    /// The caller is responsible for only asking once every source of the
    /// edge has finished.
    pub fn should_fire<R: ResultSource + ?Sized>(
        &self,
        index: usize,
        registry: &FunctionRegistry,
        results: &R,
        node_args: Option<&Value>,
    ) -> Result<bool> {
        let edge = self.edges.get(index).ok_or_else(|| {
            FlowdagError::evaluation(format!("no edge with index {index}"))
        })?;
        edge.condition.evaluate(registry, results, node_args)
    }

    /// Fallback for the currently failed nodes, if any rule applies.
    ///
    /// Failure conditions never inspect results, only node arguments.
    pub fn resolve_failure(
        &self,
        failed: &BTreeSet<String>,
        registry: &FunctionRegistry,
        node_args: Option<&Value>,
    ) -> Result<Option<FallbackResolution<'_>>> {
        let no_results: BTreeMap<String, Value> = BTreeMap::new();
        self.failures.resolve(failed, |entry| {
            entry.condition.evaluate(registry, &no_results, node_args)
        })
    }

    /// Seconds until the dispatcher samples the flow again, `None` to stop.
    pub fn next_sampling(
        &self,
        registry: &FunctionRegistry,
        call: StrategyCall<'_>,
    ) -> Result<Option<u64>> {
        self.sampling.next_retry(registry, call)
    }
}

impl TaskEntry {
    fn from_task(task: &Task, global: &GlobalConfig) -> Self {
        Self {
            class_name: task.class_name.clone(),
            import: task.import.clone(),
            queue: Node::Task(task).queue_name(global).to_string(),
            storage: task.storage.clone(),
            storage_readonly: task.storage_readonly,
            storage_task_name: task.storage_task_name.clone(),
            max_retry: task.max_retry,
            retry_countdown: task.retry_countdown,
            throttling_secs: task.throttling.map(|d| d.as_secs()),
            selective_run_function: task.selective_run_function.clone(),
            output_schema: task.output_schema.clone(),
        }
    }
}

impl From<&Storage> for StorageEntry {
    fn from(storage: &Storage) -> Self {
        Self {
            class_name: storage.class_name.clone(),
            import: storage.import.clone(),
            configuration: storage.configuration.clone(),
            cache: storage.cache,
        }
    }
}
