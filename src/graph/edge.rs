// src/graph/edge.rs

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::{EdgeConfig, Propagate};
use crate::errors::{FlowdagError, Result};
use crate::graph::{BuildContext, Flow, NodeKind, Predicate};
use crate::registry::FunctionRef;

/// Conditioned hyperedge from a set of source nodes to a set of destinations.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Empty only for starting edges.
    pub nodes_from: Vec<String>,
    pub nodes_to: Vec<String>,
    pub predicate: Predicate,
    pub foreach: Option<Foreach>,
    pub selective: Option<Selective>,
}

/// Fan-out: the destinations are started once per item the function yields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Foreach {
    pub function: FunctionRef,
    pub propagate_result: bool,
}

/// Run only the listed tasks of the destination flow (and what they need).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selective {
    pub tasks: Vec<String>,
    pub run_subsequent: Propagate,
    pub follow_subflows: bool,
}

impl Edge {
    pub fn from_config(cfg: &EdgeConfig, flow: &str, ctx: &BuildContext<'_>) -> Result<Self> {
        let nodes_from = match cfg.from.as_ref() {
            Some(from) => from.to_vec(),
            None => {
                return Err(FlowdagError::config(format!(
                    "flow '{flow}': edge is missing the 'from' key (use an empty list for a \
                     starting edge)"
                )));
            }
        };

        let nodes_to = cfg.to.as_ref().map(|to| to.to_vec()).unwrap_or_default();
        if nodes_to.is_empty() {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': edge from {nodes_from:?} has no destination in 'to'"
            )));
        }

        for name in nodes_from.iter().chain(nodes_to.iter()) {
            if ctx.kind_of(name).is_none() {
                return Err(FlowdagError::config(format!(
                    "flow '{flow}': edge references unknown node '{name}'"
                )));
            }
        }

        let predicate = Predicate::construct(cfg.condition.as_ref(), &nodes_from, flow, ctx)?;
        predicate.check(&nodes_from, flow, !nodes_from.is_empty(), ctx)?;

        let foreach = match cfg.foreach.as_ref() {
            Some(foreach) => {
                let function = FunctionRef::new(&foreach.import, &foreach.function);
                if !ctx.registry.has_foreach(&function) {
                    return Err(FlowdagError::config(format!(
                        "flow '{flow}': unknown foreach function '{function}'"
                    )));
                }
                Some(Foreach {
                    function,
                    propagate_result: foreach.propagate_result,
                })
            }
            None => None,
        };

        let selective = match cfg.selective.as_ref() {
            Some(selective) => {
                let tasks = selective.tasks.to_vec();
                if tasks.is_empty() {
                    return Err(FlowdagError::config(format!(
                        "flow '{flow}': selective edge to {nodes_to:?} lists no tasks"
                    )));
                }
                Some(Selective {
                    tasks,
                    run_subsequent: selective.run_subsequent.clone(),
                    follow_subflows: selective.follow_subflows,
                })
            }
            None => None,
        };

        Ok(Self {
            nodes_from,
            nodes_to,
            predicate,
            foreach,
            selective,
        })
    }

    pub fn is_starting(&self) -> bool {
        self.nodes_from.is_empty()
    }

    /// Cross-field invariants that need the owning flow.
    pub fn check(&self, flow: &Flow, ctx: &BuildContext<'_>) -> Result<()> {
        let name = &flow.name;

        for (label, nodes) in [("from", &self.nodes_from), ("to", &self.nodes_to)] {
            let mut seen = BTreeSet::new();
            for node in nodes {
                if !seen.insert(node.as_str()) {
                    return Err(FlowdagError::config(format!(
                        "flow '{name}': node '{node}' is listed twice in '{label}' of one edge"
                    )));
                }
            }
        }

        if let Some(foreach) = &self.foreach {
            if foreach.propagate_result {
                for dest in &self.nodes_to {
                    if ctx.kind_of(dest) != Some(NodeKind::Flow) {
                        return Err(FlowdagError::config(format!(
                            "flow '{name}': foreach '{}' propagates its result, but destination \
                             '{dest}' is not a flow",
                            foreach.function
                        )));
                    }
                    if flow.should_propagate_node_args(dest) {
                        return Err(FlowdagError::config(format!(
                            "flow '{name}': destination '{dest}' cannot receive both the foreach \
                             result and propagated node arguments"
                        )));
                    }
                }
            }
        }

        if self.selective.is_some() {
            match self.nodes_to.as_slice() {
                [dest] if ctx.kind_of(dest) == Some(NodeKind::Flow) => {}
                [dest] => {
                    return Err(FlowdagError::config(format!(
                        "flow '{name}': selective run requires a flow destination, '{dest}' is a task"
                    )));
                }
                _ => {
                    return Err(FlowdagError::config(format!(
                        "flow '{name}': selective run requires exactly one destination, got {:?}",
                        self.nodes_to
                    )));
                }
            }
        }

        Ok(())
    }
}
