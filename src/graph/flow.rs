// src/graph/flow.rs

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cache::CacheSpec;
use crate::config::model::StrategyConfig;
use crate::config::{FlowDefinition, Propagate};
use crate::errors::{FlowdagError, Result};
use crate::graph::failures::FailureRule;
use crate::graph::{BuildContext, Edge, FailureGraph, Fallback, FlowGraph};
use crate::registry::strategies::{DEFAULT_MAX_RETRY, DEFAULT_START_RETRY, DEFAULT_STRATEGY};
use crate::registry::{FunctionRef, FunctionRegistry, STRATEGIES_MODULE, StrategyCall, match_arguments};

/// Sampling strategy of a flow's dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub function: FunctionRef,
    pub args: BTreeMap<String, Value>,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            function: FunctionRef::new(STRATEGIES_MODULE, DEFAULT_STRATEGY),
            args: BTreeMap::from([
                ("start_retry".to_string(), json!(DEFAULT_START_RETRY)),
                ("max_retry".to_string(), json!(DEFAULT_MAX_RETRY)),
            ]),
        }
    }
}

impl Strategy {
    pub fn from_config(
        cfg: Option<&StrategyConfig>,
        flow: &str,
        registry: &FunctionRegistry,
    ) -> Result<Self> {
        let Some(cfg) = cfg else {
            return Ok(Self::default());
        };

        let module = cfg.import.as_deref().unwrap_or(STRATEGIES_MODULE);
        let function = FunctionRef::new(module, &cfg.name);
        let descriptor = registry.strategy(&function).ok_or_else(|| {
            FlowdagError::config(format!("flow '{flow}': unknown sampling strategy '{function}'"))
        })?;

        match_arguments(
            descriptor.params.iter().map(String::as_str),
            cfg.args.keys().map(String::as_str),
        )
        .map_err(|detail| {
            FlowdagError::config(format!(
                "flow '{flow}': sampling strategy '{function}' arguments do not match: {detail}"
            ))
        })?;

        let args = cfg
            .args
            .iter()
            .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), serde_json::to_value(v)?)) })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self { function, args })
    }

    /// Seconds until the next sampling, `None` to stop.
    pub fn next_retry(
        &self,
        registry: &FunctionRegistry,
        call: StrategyCall<'_>,
    ) -> Result<Option<u64>> {
        let eval = registry
            .strategy(&self.function)
            .and_then(|d| d.eval)
            .ok_or_else(|| {
                FlowdagError::evaluation(format!(
                    "sampling strategy '{}' has no implementation in this registry",
                    self.function
                ))
            })?;
        eval(&StrategyCall {
            args: Some(&self.args),
            ..call
        })
    }
}

/// A named sub-graph of tasks and flows.
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub edges: Vec<Edge>,
    pub failure_rules: Vec<FailureRule>,
    pub failures: FailureGraph,
    pub graph: FlowGraph,
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
    pub cache: Option<CacheSpec>,
    pub sampling: Strategy,
    pub throttling: Option<Duration>,
    pub max_retry: u32,
    pub retry_countdown: u32,
    pub queue: Option<String>,
}

impl Flow {
    pub fn from_config(def: &FlowDefinition, ctx: &BuildContext<'_>) -> Result<Self> {
        let name = def.name.as_str();

        let edges = def
            .edges
            .iter()
            .map(|e| Edge::from_config(e, name, ctx))
            .collect::<Result<Vec<_>>>()?;

        let failure_rules = def
            .failures
            .iter()
            .map(|f| FailureRule::from_config(f, name, ctx))
            .collect::<Result<Vec<_>>>()?;

        let cache = def
            .cache
            .as_ref()
            .map(|c| CacheSpec::from_config(c, &format!("flow '{name}'")))
            .transpose()?;

        let throttling = def
            .throttling
            .map(|t| t.to_duration(&format!("flow '{name}'")))
            .transpose()?;
        if throttling == Some(Duration::ZERO) {
            warn!(flow = %name, "zero throttling has no effect");
        }

        let flow = Self {
            name: def.name.clone(),
            failures: FailureGraph::build(&failure_rules),
            graph: FlowGraph::from_edges(&edges),
            edges,
            failure_rules,
            nowait: def.nowait.to_vec().into_iter().collect(),
            eager_failures: def.eager_failures.to_vec().into_iter().collect(),
            propagate_node_args: def.propagate_node_args.clone(),
            propagate_parent: def.propagate_parent.clone(),
            propagate_parent_failures: def.propagate_parent_failures.clone(),
            propagate_finished: def.propagate_finished.clone(),
            propagate_compound_finished: def.propagate_compound_finished.clone(),
            propagate_failures: def.propagate_failures.clone(),
            propagate_compound_failures: def.propagate_compound_failures.clone(),
            node_args_from_first: def.node_args_from_first,
            cache,
            sampling: Strategy::from_config(def.sampling.as_ref(), name, ctx.registry)?,
            throttling,
            max_retry: def.max_retry,
            retry_countdown: def.retry_countdown,
            queue: def.queue.clone(),
        };

        for edge in &flow.edges {
            edge.check(&flow, ctx)?;
        }

        debug!(
            flow = %flow.name,
            edges = flow.edges.len(),
            failure_rules = flow.failure_rules.len(),
            "built flow"
        );
        Ok(flow)
    }

    pub fn starting_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|e| e.is_starting())
    }

    /// Nodes that are a source of an edge or named in a failure rule.
    pub fn all_source_nodes(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = self
            .edges
            .iter()
            .flat_map(|e| e.nodes_from.iter().map(String::as_str))
            .collect();
        for rule in &self.failure_rules {
            out.extend(rule.nodes.iter().map(String::as_str));
        }
        out
    }

    /// Nodes that are a destination of an edge or started as a fallback.
    pub fn all_destination_nodes(&self) -> BTreeSet<&str> {
        let mut out: BTreeSet<&str> = self
            .edges
            .iter()
            .flat_map(|e| e.nodes_to.iter().map(String::as_str))
            .collect();
        out.extend(self.fallback_nodes());
        out
    }

    pub fn all_used_nodes(&self) -> BTreeSet<&str> {
        let mut out = self.all_source_nodes();
        out.extend(self.all_destination_nodes());
        out
    }

    /// Nodes started by some fallback.
    pub fn fallback_nodes(&self) -> BTreeSet<&str> {
        self.failure_rules
            .iter()
            .filter_map(|r| match &r.fallback {
                Fallback::Nodes(nodes) => Some(nodes),
                Fallback::StopFlow => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }

    pub fn should_propagate_node_args(&self, node: &str) -> bool {
        self.propagate_node_args.applies_to(node)
    }

    pub fn should_propagate_parent(&self, node: &str) -> bool {
        self.propagate_parent.applies_to(node)
    }

    pub fn should_propagate_parent_failures(&self, node: &str) -> bool {
        self.propagate_parent_failures.applies_to(node)
    }

    pub fn should_propagate_finished(&self, node: &str) -> bool {
        self.propagate_finished.applies_to(node)
    }

    pub fn should_propagate_compound_finished(&self, node: &str) -> bool {
        self.propagate_compound_finished.applies_to(node)
    }

    pub fn should_propagate_failures(&self, node: &str) -> bool {
        self.propagate_failures.applies_to(node)
    }

    pub fn should_propagate_compound_failures(&self, node: &str) -> bool {
        self.propagate_compound_failures.applies_to(node)
    }

    /// The propagation flags by configuration key.
    pub fn propagation_flags(&self) -> [(&'static str, &Propagate); 7] {
        [
            ("propagate_node_args", &self.propagate_node_args),
            ("propagate_parent", &self.propagate_parent),
            ("propagate_parent_failures", &self.propagate_parent_failures),
            ("propagate_finished", &self.propagate_finished),
            ("propagate_compound_finished", &self.propagate_compound_finished),
            ("propagate_failures", &self.propagate_failures),
            ("propagate_compound_failures", &self.propagate_compound_failures),
        ]
    }

    /// Indices of edges to fire so that `tasks` run in a selective run of
    /// this flow. With `run_subsequent`, everything depending on `tasks`
    /// runs as well.
    pub fn selective_edges<S: AsRef<str>>(
        &self,
        tasks: &[S],
        run_subsequent: bool,
    ) -> Result<Vec<usize>> {
        let mut targets: BTreeSet<&str> = BTreeSet::new();
        for task in tasks {
            let task = task.as_ref();
            if !self.graph.contains(task) {
                return Err(FlowdagError::config(format!(
                    "flow '{}': selective run requests '{task}' which is not part of the flow",
                    self.name
                )));
            }
            targets.insert(task);
            if run_subsequent {
                targets.extend(self.graph.descendants(task));
            }
        }

        Ok(self.graph.plan(&self.edges, targets))
    }
}
