// src/system/mod.rs

//! The assembled, validated set of tasks, flows and storages.
//!
//! - [`validate`] holds the per-flow consistency checks.
//! - [`dispatch`] turns a [`System`] into the serializable dispatch table.

pub mod dispatch;
pub mod validate;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, info, warn};

use crate::config::{ConfigSet, GlobalConfig, Propagate};
use crate::errors::{FlowdagError, Result};
use crate::graph::{BuildContext, Flow, Node, NodeKind, Storage, Task, TaskClass};
use crate::registry::FunctionRegistry;

pub use dispatch::{DispatchTable, EdgeEntry, FlowTable, SelectiveEntry, StorageEntry, TaskEntry};

#[derive(Debug, Clone)]
pub struct System {
    global: GlobalConfig,
    tasks: BTreeMap<String, Task>,
    flows: BTreeMap<String, Flow>,
    storages: BTreeMap<String, Storage>,
    task_classes: Vec<TaskClass>,
}

impl System {
    /// Build every node, then run the consistency checks.
    pub fn build(config: &ConfigSet, registry: &FunctionRegistry) -> Result<Self> {
        let nodes = config.nodes();
        let global = GlobalConfig::from(&nodes.global);

        for sink in &global.trace_sinks {
            if !registry.has_trace_sink(sink) {
                return Err(FlowdagError::config(format!("unknown trace sink '{sink}'")));
            }
        }

        let storages = nodes
            .storages
            .iter()
            .map(|s| Storage::from_config(s).map(|s| (s.name.clone(), s)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let mut tasks = BTreeMap::new();
        for cfg in &nodes.tasks {
            let task = Task::from_config(cfg, registry)?;
            if let Some(storage) = task.storage.as_deref() {
                if !storages.contains_key(storage) {
                    return Err(FlowdagError::config(format!(
                        "task '{}' references unknown storage '{storage}'",
                        task.name
                    )));
                }
            }
            tasks.insert(task.name.clone(), task);
        }

        let flow_names: BTreeSet<String> = nodes.flows.iter().cloned().collect();
        let ctx = BuildContext {
            global: &global,
            registry,
            tasks: &tasks,
            flow_names: &flow_names,
        };

        let mut flows = BTreeMap::new();
        let mut first_err = None;
        for def in config.flow_definitions() {
            match Flow::from_config(def, &ctx) {
                Ok(flow) => {
                    flows.insert(flow.name.clone(), flow);
                }
                Err(e) => {
                    error!(flow = %def.name, error = %e, "flow definition is invalid");
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let task_classes = group_task_classes(&tasks);

        let system = Self {
            global,
            tasks,
            flows,
            storages,
            task_classes,
        };

        validate::validate_flows(&system)?;
        system.warn_unused();

        info!(
            tasks = system.tasks.len(),
            flows = system.flows.len(),
            storages = system.storages.len(),
            "system built"
        );
        Ok(system)
    }

    pub fn global(&self) -> &GlobalConfig {
        &self.global
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn storages(&self) -> impl Iterator<Item = &Storage> {
        self.storages.values()
    }

    pub fn task_classes(&self) -> &[TaskClass] {
        &self.task_classes
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    pub fn flow(&self, name: &str) -> Option<&Flow> {
        self.flows.get(name)
    }

    pub fn storage(&self, name: &str) -> Option<&Storage> {
        self.storages.get(name)
    }

    pub fn node(&self, name: &str) -> Option<Node<'_>> {
        self.tasks
            .get(name)
            .map(Node::Task)
            .or_else(|| self.flows.get(name).map(Node::Flow))
    }

    pub fn kind_of(&self, name: &str) -> Option<NodeKind> {
        self.node(name).map(|n| n.kind())
    }

    /// Flows started from `flow`, directly.
    pub fn sub_flows_of<'a>(&'a self, flow: &'a Flow) -> BTreeSet<&'a str> {
        flow.all_destination_nodes()
            .into_iter()
            .filter(|n| self.flows.contains_key(*n))
            .collect()
    }

    /// Whether an edge of `flow` starts `task`, or (with `follow_subflows`)
    /// an edge of a sub-flow the flow's edges start. Nodes only reachable as
    /// fallbacks do not count; a selective run cannot plan them.
    pub fn flow_runs_task(&self, flow: &Flow, task: &str, follow_subflows: bool) -> bool {
        let mut visited = BTreeSet::new();
        self.flow_runs_task_inner(flow, task, follow_subflows, &mut visited)
    }

    fn flow_runs_task_inner<'a>(
        &'a self,
        flow: &'a Flow,
        task: &str,
        follow_subflows: bool,
        visited: &mut BTreeSet<&'a str>,
    ) -> bool {
        if !visited.insert(flow.name.as_str()) {
            return false;
        }
        if flow.graph.contains(task) {
            return true;
        }
        follow_subflows
            && self.sub_flows_of(flow).into_iter().any(|sub| {
                flow.graph.contains(sub)
                    && self
                        .flows
                        .get(sub)
                        .is_some_and(|sub| self.flow_runs_task_inner(sub, task, true, visited))
            })
    }

    /// Edges to fire, per flow, for a selective run of `target`.
    ///
    /// Tasks found in `target` are planned there directly. With
    /// `follow_subflows`, tasks living in sub-flows make the sub-flow itself a
    /// target of the parent and are planned inside the sub-flow as well.
    /// `run_subsequent` decides per flow whether dependents run too.
    pub fn selective_plan<S: AsRef<str>>(
        &self,
        target: &str,
        tasks: &[S],
        run_subsequent: &Propagate,
        follow_subflows: bool,
    ) -> Result<BTreeMap<String, Vec<usize>>> {
        let flow = self.flows.get(target).ok_or_else(|| {
            FlowdagError::config(format!("selective run targets unknown flow '{target}'"))
        })?;

        for task in tasks {
            let task = task.as_ref();
            if !self.flow_runs_task(flow, task, follow_subflows) {
                return Err(FlowdagError::config(format!(
                    "selective run of flow '{target}' requests '{task}' which the flow does not run"
                )));
            }
        }

        let tasks: Vec<&str> = tasks.iter().map(|t| t.as_ref()).collect();
        let mut plan = BTreeMap::new();
        let mut visited = BTreeSet::new();
        if !self.plan_flow(flow, &tasks, run_subsequent, follow_subflows, &mut visited, &mut plan)? {
            return Err(FlowdagError::config(format!(
                "selective run of flow '{target}' plans no edges"
            )));
        }
        debug!(flow = %target, flows = plan.len(), "planned selective run");
        Ok(plan)
    }

    fn plan_flow<'a>(
        &'a self,
        flow: &'a Flow,
        tasks: &[&str],
        run_subsequent: &Propagate,
        follow_subflows: bool,
        visited: &mut BTreeSet<&'a str>,
        plan: &mut BTreeMap<String, Vec<usize>>,
    ) -> Result<bool> {
        if !visited.insert(flow.name.as_str()) {
            return Ok(plan.contains_key(&flow.name));
        }

        let mut targets: Vec<&str> = tasks
            .iter()
            .copied()
            .filter(|t| flow.graph.contains(t))
            .collect();

        let remaining: Vec<&str> = tasks
            .iter()
            .copied()
            .filter(|t| !flow.graph.contains(t))
            .collect();

        if follow_subflows && !remaining.is_empty() {
            for sub in self.sub_flows_of(flow) {
                let Some(sub_flow) = self.flows.get(sub) else {
                    continue;
                };
                if self.plan_flow(sub_flow, &remaining, run_subsequent, true, visited, plan)?
                    && flow.graph.contains(sub)
                {
                    targets.push(sub);
                }
            }
        }

        if targets.is_empty() {
            return Ok(false);
        }

        let edges = flow.selective_edges(&targets, run_subsequent.applies_to(&flow.name))?;
        plan.insert(flow.name.clone(), edges);
        Ok(true)
    }

    fn warn_unused(&self) {
        let referenced_storages: BTreeSet<&str> =
            self.tasks.values().filter_map(|t| t.storage.as_deref()).collect();
        for name in self.storages.keys() {
            if !referenced_storages.contains(name.as_str()) {
                warn!(storage = %name, "storage is not used by any task");
            }
        }

        let used: BTreeSet<&str> = self.flows.values().flat_map(Flow::all_used_nodes).collect();
        for name in self.tasks.keys() {
            if !used.contains(name.as_str()) {
                warn!(task = %name, "task is not referenced by any flow");
            }
        }
    }
}

fn group_task_classes(tasks: &BTreeMap<String, Task>) -> Vec<TaskClass> {
    let mut classes: BTreeMap<(&str, &str), Vec<String>> = BTreeMap::new();
    for task in tasks.values() {
        classes
            .entry((task.import.as_str(), task.class_name.as_str()))
            .or_default()
            .push(task.name.clone());
    }
    classes
        .into_iter()
        .map(|((import, class_name), tasks)| TaskClass {
            class_name: class_name.to_string(),
            import: import.to_string(),
            tasks,
        })
        .collect()
}
