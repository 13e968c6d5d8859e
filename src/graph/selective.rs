// src/graph/selective.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};

use crate::graph::Edge;

/// Node-level dependency graph of one flow.
///
/// Every hyperedge `from -> to` contributes one petgraph edge per
/// `(source, destination)` pair, weighted with the index of the hyperedge it
/// came from. Destinations of starting edges have no incoming edge.
#[derive(Debug, Clone, Default)]
pub struct FlowGraph {
    graph: DiGraph<String, usize>,
    index: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    pub fn from_edges(edges: &[Edge]) -> Self {
        let mut fg = Self::default();

        for (i, edge) in edges.iter().enumerate() {
            for to in &edge.nodes_to {
                let to_ix = fg.ensure_node(to);
                for from in &edge.nodes_from {
                    let from_ix = fg.ensure_node(from);
                    fg.graph.add_edge(from_ix, to_ix, i);
                }
            }
        }

        fg
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex {
        if let Some(ix) = self.index.get(name) {
            return *ix;
        }
        let ix = self.graph.add_node(name.to_string());
        self.index.insert(name.to_string(), ix);
        ix
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(String::as_str)
    }

    /// Direct predecessors of `name`.
    pub fn dependencies_of(&self, name: &str) -> BTreeSet<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Direct successors of `name`.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, dir: Direction) -> BTreeSet<&str> {
        let Some(&ix) = self.index.get(name) else {
            return BTreeSet::new();
        };
        self.graph
            .neighbors_directed(ix, dir)
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Every node `name` transitively depends on, excluding itself.
    pub fn ancestors(&self, name: &str) -> BTreeSet<&str> {
        let Some(&start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut out = BTreeSet::new();
        while let Some(ix) = bfs.next(reversed) {
            if ix != start {
                out.insert(self.graph[ix].as_str());
            }
        }
        out
    }

    /// Every node transitively depending on `name`, excluding itself.
    pub fn descendants(&self, name: &str) -> BTreeSet<&str> {
        let Some(&start) = self.index.get(name) else {
            return BTreeSet::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = BTreeSet::new();
        while let Some(ix) = bfs.next(&self.graph) {
            if ix != start {
                out.insert(self.graph[ix].as_str());
            }
        }
        out
    }

    /// Indices of hyperedges that have to fire so that every node in
    /// `targets` runs.
    ///
    /// A hyperedge is needed when it leads to a node in `targets` or to one
    /// of their ancestors, and all of its sources are needed as well (or it
    /// is a starting edge).
    pub fn plan<'a>(&self, edges: &[Edge], targets: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        let mut needed: BTreeSet<&str> = BTreeSet::new();
        for target in targets {
            needed.insert(target);
            needed.extend(self.ancestors(target));
        }

        edges
            .iter()
            .enumerate()
            .filter(|(_, edge)| {
                edge.nodes_to.iter().any(|n| needed.contains(n.as_str()))
                    && edge.nodes_from.iter().all(|n| needed.contains(n.as_str()))
            })
            .map(|(i, _)| i)
            .collect()
    }
}
