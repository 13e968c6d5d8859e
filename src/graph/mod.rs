// src/graph/mod.rs

//! Graph model: nodes, edges, conditions and failure handling.
//!
//! - [`node`] is the tagged Task/Flow view shared by everything else.
//! - [`task`] and [`storage`] hold task and storage declarations.
//! - [`predicate`] parses and renders edge/failure conditions.
//! - [`edge`] and [`flow`] model a flow's hyperedges and propagation flags.
//! - [`failures`] builds the failure permutation graph.
//! - [`selective`] plans selective runs over a flow's dependency graph.

pub mod edge;
pub mod failures;
pub mod flow;
pub mod node;
pub mod predicate;
pub mod selective;
pub mod storage;
pub mod task;

use std::collections::{BTreeMap, BTreeSet};

pub use edge::{Edge, Foreach, Selective};
pub use failures::{
    FailureGraph, FailureNode, FailureNodeId, FailureRule, Fallback, FallbackEntry,
    FallbackResolution,
};
pub use flow::{Flow, Strategy};
pub use node::{Node, NodeKind};
pub use predicate::{Predicate, PredicateExpr, ResultSource};
pub use selective::FlowGraph;
pub use storage::Storage;
pub use task::{Task, TaskClass};

use crate::config::GlobalConfig;
use crate::registry::FunctionRegistry;

/// What flow construction can see while the system is being assembled.
///
/// Tasks are fully built before any flow, flows are only known by name until
/// all of them are built.
#[derive(Debug, Clone, Copy)]
pub struct BuildContext<'a> {
    pub global: &'a GlobalConfig,
    pub registry: &'a FunctionRegistry,
    pub tasks: &'a BTreeMap<String, Task>,
    pub flow_names: &'a BTreeSet<String>,
}

impl<'a> BuildContext<'a> {
    pub fn kind_of(&self, name: &str) -> Option<NodeKind> {
        if self.tasks.contains_key(name) {
            Some(NodeKind::Task)
        } else if self.flow_names.contains(name) {
            Some(NodeKind::Flow)
        } else {
            None
        }
    }

    pub fn task(&self, name: &str) -> Option<&'a Task> {
        self.tasks.get(name)
    }
}
