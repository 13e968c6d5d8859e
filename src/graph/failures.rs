// src/graph/failures.rs

//! Failure rules and the failure permutation graph.
//!
//! Rules map a set of failed nodes to a fallback. Instead of scanning every
//! rule whenever a node fails, each flow gets a graph with one vertex per
//! failed-node subset that appears in some rule: starting from the vertex
//! for a single failed node, each further failure is one `to(name)` hop.
//!
//! For a rule over `k` nodes every subset of those nodes is materialized and
//! linked `S --n--> S ∪ {n}`. Subsets reached through different insertion
//! orders (`{A}+B` and `{B}+A`) are the same vertex, found through an index
//! keyed by the sorted subset, so the structure stays a lattice rather than
//! a tree of permutations.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{FailureConfig, FallbackConfig};
use crate::errors::{FlowdagError, Result};
use crate::graph::{BuildContext, Predicate, PredicateExpr};

/// What to do once a failure rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// `fallback = true`: stop the flow, treating the failure as handled.
    StopFlow,
    /// Start these nodes instead.
    Nodes(Vec<String>),
}

/// A declared `{ nodes, fallback, propagate_failure, condition }` rule.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRule {
    pub nodes: Vec<String>,
    pub fallback: Fallback,
    pub propagate_failure: bool,
    pub condition: Predicate,
}

impl FailureRule {
    pub fn from_config(cfg: &FailureConfig, flow: &str, ctx: &BuildContext<'_>) -> Result<Self> {
        let nodes = cfg.nodes.to_vec();
        if nodes.is_empty() {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': failure rule lists no nodes"
            )));
        }

        let mut seen = BTreeSet::new();
        for node in &nodes {
            if !seen.insert(node.as_str()) {
                return Err(FlowdagError::config(format!(
                    "flow '{flow}': node '{node}' is listed twice in one failure rule"
                )));
            }
            if ctx.kind_of(node).is_none() {
                return Err(FlowdagError::config(format!(
                    "flow '{flow}': failure rule references unknown node '{node}'"
                )));
            }
        }

        let fallback = match &cfg.fallback {
            FallbackConfig::Flag(true) => Fallback::StopFlow,
            FallbackConfig::Flag(false) => {
                return Err(FlowdagError::config(format!(
                    "flow '{flow}': fallback for {nodes:?} must be `true` or a list of nodes"
                )));
            }
            FallbackConfig::Nodes(list) => {
                let list = list.to_vec();
                if list.is_empty() {
                    return Err(FlowdagError::config(format!(
                        "flow '{flow}': empty fallback list for {nodes:?}"
                    )));
                }
                for fb in &list {
                    if ctx.kind_of(fb).is_none() {
                        return Err(FlowdagError::config(format!(
                            "flow '{flow}': unknown fallback node '{fb}'"
                        )));
                    }
                }
                Fallback::Nodes(list)
            }
        };

        if fallback == Fallback::StopFlow && cfg.propagate_failure {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': failure rule for {nodes:?} cannot both stop the flow \
                 (fallback = true) and propagate the failure"
            )));
        }

        if let (Fallback::Nodes(fb), [only]) = (&fallback, nodes.as_slice()) {
            if fb.len() == 1 && &fb[0] == only {
                return Err(FlowdagError::config(format!(
                    "flow '{flow}': node '{only}' cannot be its own fallback"
                )));
            }
        }

        let condition = Predicate::construct(cfg.condition.as_ref(), &nodes, flow, ctx)?;
        condition.check(&nodes, flow, false, ctx)?;

        Ok(Self {
            nodes,
            fallback,
            propagate_failure: cfg.propagate_failure,
            condition,
        })
    }
}

/// Handle of a vertex in a [`FailureGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureNodeId(pub usize);

/// A fallback attached to a failed-node subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackEntry {
    pub fallback: Fallback,
    pub condition: PredicateExpr,
    /// Rendered condition, for logs.
    pub condition_str: String,
    pub propagate_failure: bool,
}

/// One materialized failed-node subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureNode {
    pub traversed: BTreeSet<String>,
    /// Keyed by the name of the node whose failure is added.
    pub next: BTreeMap<String, FailureNodeId>,
    /// Entries in rule declaration order; the first whose condition holds
    /// applies.
    pub fallbacks: Vec<FallbackEntry>,
}

impl FailureNode {
    fn new(traversed: BTreeSet<String>) -> Self {
        Self {
            traversed,
            next: BTreeMap::new(),
            fallbacks: Vec::new(),
        }
    }

    pub fn has_fallback(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

/// Outcome of [`FailureGraph::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackResolution<'a> {
    pub node: FailureNodeId,
    /// The failed nodes this fallback covers.
    pub traversed: &'a BTreeSet<String>,
    pub entry: &'a FallbackEntry,
}

/// Per-flow failure permutation graph. Immutable once built.
///
/// `nodes` is the allocation order of all vertices, which is the order they
/// are emitted in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FailureGraph {
    nodes: Vec<FailureNode>,
    starting: BTreeMap<String, FailureNodeId>,
}

impl FailureGraph {
    pub fn build(rules: &[FailureRule]) -> Self {
        let mut builder = Builder::default();
        for rule in rules {
            builder.add_rule(rule);
        }
        debug!(
            rules = rules.len(),
            vertices = builder.graph.nodes.len(),
            "built failure graph"
        );
        builder.graph
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Vertex for the single failed node `name`.
    pub fn entry(&self, name: &str) -> Option<FailureNodeId> {
        self.starting.get(name).copied()
    }

    /// Follow the link for one more failed node.
    pub fn to(&self, from: FailureNodeId, name: &str) -> Option<FailureNodeId> {
        self.nodes.get(from.0)?.next.get(name).copied()
    }

    pub fn node(&self, id: FailureNodeId) -> Option<&FailureNode> {
        self.nodes.get(id.0)
    }

    /// Nodes with a singleton entry, i.e. every node named in some rule.
    pub fn starting_nodes(&self) -> impl Iterator<Item = &str> {
        self.starting.keys().map(String::as_str)
    }

    /// Vertices in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (FailureNodeId, &FailureNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (FailureNodeId(i), n))
    }

    /// Walk failures in the given order: entry for the first, one hop each
    /// for the rest.
    pub fn walk<S: AsRef<str>>(&self, failed: &[S]) -> Option<FailureNodeId> {
        let (first, rest) = failed.split_first()?;
        rest.iter()
            .try_fold(self.entry(first.as_ref())?, |id, name| {
                self.to(id, name.as_ref())
            })
    }

    /// Vertex for exactly this failed set, if materialized.
    pub fn lookup(&self, failed: &BTreeSet<String>) -> Option<FailureNodeId> {
        let ordered: Vec<&str> = failed.iter().map(String::as_str).collect();
        self.walk(&ordered)
    }

    /// Find the fallback for a set of failed nodes.
    ///
    /// Only subsets named by rules are materialized, so the exact failed set
    /// may have no vertex. The vertices inside `failed` are reached from the
    /// singleton entries by following only links for failed nodes; they are
    /// tried from the largest subset down, ties in allocation order. Within a
    /// vertex, entries are tried in declaration order and `condition_holds`
    /// decides which one applies.
    pub fn resolve<F>(
        &self,
        failed: &BTreeSet<String>,
        mut condition_holds: F,
    ) -> Result<Option<FallbackResolution<'_>>>
    where
        F: FnMut(&FallbackEntry) -> Result<bool>,
    {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<FailureNodeId> =
            failed.iter().filter_map(|name| self.entry(name)).collect();
        let mut reached = Vec::new();

        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            reached.push(id);
            stack.extend(
                self.nodes[id.0]
                    .next
                    .iter()
                    .filter(|(name, next)| failed.contains(*name) && !seen[next.0])
                    .map(|(_, next)| *next),
            );
        }

        reached.sort_by_key(|id| (Reverse(self.nodes[id.0].traversed.len()), *id));

        for id in reached {
            let node = &self.nodes[id.0];
            for entry in &node.fallbacks {
                if condition_holds(entry)? {
                    return Ok(Some(FallbackResolution {
                        node: id,
                        traversed: &node.traversed,
                        entry,
                    }));
                }
            }
        }

        Ok(None)
    }
}

#[derive(Debug, Default)]
struct Builder {
    graph: FailureGraph,
    index: HashMap<Vec<String>, FailureNodeId>,
}

impl Builder {
    fn add_rule(&mut self, rule: &FailureRule) {
        let mut frontier: Vec<FailureNodeId> = rule
            .nodes
            .iter()
            .map(|name| self.singleton(name))
            .collect();

        for _ in 2..=rule.nodes.len() {
            let mut next_frontier = Vec::new();
            for &current in &frontier {
                for candidate in &rule.nodes {
                    if self.graph.nodes[current.0].traversed.contains(candidate) {
                        continue;
                    }
                    let mut subset = self.graph.nodes[current.0].traversed.clone();
                    subset.insert(candidate.clone());
                    let target = self.vertex_for(subset);
                    self.graph.nodes[current.0]
                        .next
                        .insert(candidate.clone(), target);
                    if !next_frontier.contains(&target) {
                        next_frontier.push(target);
                    }
                }
            }
            frontier = next_frontier;
        }

        let Some(id) = self.graph.walk(&rule.nodes) else {
            // Every subset of the rule's nodes was materialized above.
            warn!(nodes = ?rule.nodes, "failure rule vertex not reachable; rule ignored");
            return;
        };

        let node = &mut self.graph.nodes[id.0];
        if rule.condition == Predicate::AlwaysTrue
            && node
                .fallbacks
                .iter()
                .any(|e| e.condition == PredicateExpr::AlwaysTrue)
        {
            warn!(
                nodes = ?rule.nodes,
                "failure rule follows an unconditional rule for the same nodes and never applies"
            );
        }
        node.fallbacks.push(FallbackEntry {
            fallback: rule.fallback.clone(),
            condition: rule.condition.to_expr(),
            condition_str: rule.condition.to_string(),
            propagate_failure: rule.propagate_failure,
        });
    }

    fn singleton(&mut self, name: &str) -> FailureNodeId {
        if let Some(id) = self.graph.starting.get(name) {
            return *id;
        }
        let id = self.vertex_for(BTreeSet::from([name.to_string()]));
        self.graph.starting.insert(name.to_string(), id);
        id
    }

    fn vertex_for(&mut self, subset: BTreeSet<String>) -> FailureNodeId {
        let key: Vec<String> = subset.iter().cloned().collect();
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = FailureNodeId(self.graph.nodes.len());
        self.graph.nodes.push(FailureNode::new(subset));
        self.index.insert(key, id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(nodes: &[&str], fallback: &[&str]) -> FailureRule {
        FailureRule {
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            fallback: Fallback::Nodes(fallback.iter().map(|s| s.to_string()).collect()),
            propagate_failure: false,
            condition: Predicate::AlwaysTrue,
        }
    }

    fn fallback_of(graph: &FailureGraph, id: FailureNodeId) -> Fallback {
        graph.node(id).unwrap().fallbacks[0].fallback.clone()
    }

    #[test]
    fn permutations_collapse_into_one_vertex() {
        let graph = FailureGraph::build(&[
            rule(&["T1", "T2"], &["F1"]),
            rule(&["T1", "T2", "T3"], &["F2"]),
        ]);

        let a = graph.walk(&["T1", "T2"]).unwrap();
        let b = graph.walk(&["T2", "T1"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(fallback_of(&graph, a), Fallback::Nodes(vec!["F1".to_string()]));

        let c = graph.to(a, "T3").unwrap();
        let d = graph.to(b, "T3").unwrap();
        assert_eq!(c, d);
        assert_eq!(graph.walk(&["T3", "T2", "T1"]), Some(c));
        assert_eq!(fallback_of(&graph, c), Fallback::Nodes(vec!["F2".to_string()]));

        // {T1}, {T2}, {T3}, {T1,T2}, {T1,T3}, {T2,T3}, {T1,T2,T3}
        assert_eq!(graph.len(), 7);
    }

    #[test]
    fn intermediate_subsets_have_no_fallback() {
        let graph = FailureGraph::build(&[rule(&["A", "B", "C"], &["F"])]);
        let ab = graph.walk(&["A", "B"]).unwrap();
        assert!(!graph.node(ab).unwrap().has_fallback());
        assert!(graph.walk(&["A", "D"]).is_none());
        assert!(graph.entry("D").is_none());
    }

    #[test]
    fn singletons_are_shared_across_rules() {
        let graph = FailureGraph::build(&[rule(&["A"], &["F1"]), rule(&["A", "B"], &["F2"])]);
        let a = graph.entry("A").unwrap();
        assert_eq!(fallback_of(&graph, a), Fallback::Nodes(vec!["F1".to_string()]));
        assert_eq!(graph.starting_nodes().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn resolve_prefers_largest_matching_subset() {
        let graph = FailureGraph::build(&[
            rule(&["A"], &["FA"]),
            rule(&["B"], &["FB"]),
            rule(&["A", "B"], &["FAB"]),
        ]);

        let failed: BTreeSet<String> = ["A", "B", "X"].iter().map(|s| s.to_string()).collect();
        let resolved = graph.resolve(&failed, |_| Ok(true)).unwrap().unwrap();
        assert_eq!(resolved.entry.fallback, Fallback::Nodes(vec!["FAB".to_string()]));
        assert_eq!(resolved.traversed.len(), 2);

        // Reject the combined rule: falls back to a singleton.
        let resolved = graph
            .resolve(&failed, |e| {
                Ok(e.fallback != Fallback::Nodes(vec!["FAB".to_string()]))
            })
            .unwrap()
            .unwrap();
        assert_eq!(resolved.entry.fallback, Fallback::Nodes(vec!["FA".to_string()]));

        let none: BTreeSet<String> = ["X".to_string()].into_iter().collect();
        assert!(graph.resolve(&none, |_| Ok(true)).unwrap().is_none());
    }

    #[test]
    fn resolve_visits_only_materialized_vertices() {
        let names: Vec<String> = (0..24).map(|i| format!("T{i}")).collect();
        let mut rules: Vec<FailureRule> = names
            .iter()
            .map(|n| rule(&[n.as_str()], &["F"]))
            .collect();
        rules.push(rule(&["T3", "T17"], &["F_PAIR"]));
        let graph = FailureGraph::build(&rules);
        assert_eq!(graph.len(), 25);

        let failed: BTreeSet<String> = names.iter().cloned().collect();
        let mut tried = 0;
        let resolved = graph
            .resolve(&failed, |_| {
                tried += 1;
                Ok(false)
            })
            .unwrap();
        assert!(resolved.is_none());
        assert_eq!(tried, 25);

        let resolved = graph.resolve(&failed, |_| Ok(true)).unwrap().unwrap();
        assert_eq!(resolved.entry.fallback, Fallback::Nodes(vec!["F_PAIR".to_string()]));
    }
}
