#![allow(dead_code)]

//! Builders that render nodes and flow documents as TOML.
//!
//! Going through TOML (instead of filling the serde structs directly) keeps
//! tests on the same path as real configuration, defaults included.

use flowdag::config::{ConfigSet, FlowDocument, NodesDocument, RawConfigSet};
use flowdag::config::{flows_from_str, nodes_from_str};
use flowdag::errors::Result;

/// Module the builders put tasks and storages in.
pub const APP_MODULE: &str = "app.tasks";

fn list(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("{s:?}")).collect();
    format!("[{}]", quoted.join(", "))
}

/// Builder for the nodes document.
#[derive(Debug, Clone, Default)]
pub struct NodesBuilder {
    flows: Vec<String>,
    global: Vec<String>,
    tasks: Vec<String>,
    storages: Vec<String>,
}

impl NodesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow(mut self, name: &str) -> Self {
        self.flows.push(name.to_string());
        self
    }

    pub fn task(self, name: &str) -> Self {
        self.task_with(name, "")
    }

    /// A task writing its results to `storage`.
    pub fn task_with_storage(self, name: &str, storage: &str) -> Self {
        self.task_with(name, &format!("storage = {storage:?}"))
    }

    /// A task with extra `key = value` lines.
    pub fn task_with(mut self, name: &str, extra: &str) -> Self {
        self.tasks.push(format!(
            "[[tasks]]\nname = {name:?}\nimport = {APP_MODULE:?}\n{extra}\n"
        ));
        self
    }

    pub fn storage(self, name: &str) -> Self {
        self.storage_with(name, "")
    }

    pub fn storage_with(mut self, name: &str, extra: &str) -> Self {
        self.storages.push(format!(
            "[[storages]]\nname = {name:?}\nimport = \"app.storages\"\n{extra}\n"
        ));
        self
    }

    /// A `key = value` line for the `[global]` section.
    pub fn global(mut self, line: &str) -> Self {
        self.global.push(line.to_string());
        self
    }

    pub fn to_toml(&self) -> String {
        let flows: Vec<&str> = self.flows.iter().map(String::as_str).collect();
        let mut out = format!("flows = {}\n\n", list(&flows));
        if !self.global.is_empty() {
            out.push_str("[global]\n");
            for line in &self.global {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        for block in self.tasks.iter().chain(self.storages.iter()) {
            out.push_str(block);
            out.push('\n');
        }
        out
    }

    pub fn build(&self) -> NodesDocument {
        nodes_from_str(&self.to_toml()).expect("builder renders a valid nodes document")
    }
}

/// Builder for a single `[[flow-definitions]]` entry.
#[derive(Debug, Clone)]
pub struct FlowBuilder {
    name: String,
    settings: Vec<String>,
    edges: Vec<String>,
    failures: Vec<String>,
}

impl FlowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: Vec::new(),
            edges: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Unconditional edge.
    pub fn edge(self, from: &[&str], to: &[&str]) -> Self {
        self.edge_with(from, to, "")
    }

    /// Edge with a condition given as an inline TOML table.
    pub fn edge_if(self, from: &[&str], to: &[&str], condition: &str) -> Self {
        self.edge_with(from, to, &format!("condition = {condition}"))
    }

    /// Edge with extra `key = value` lines (`foreach`, `selective`, ...).
    pub fn edge_with(mut self, from: &[&str], to: &[&str], extra: &str) -> Self {
        self.edges.push(format!(
            "[[flow-definitions.edges]]\nfrom = {}\nto = {}\n{extra}\n",
            list(from),
            list(to)
        ));
        self
    }

    /// Failure rule falling back to `fallback`.
    pub fn failure(self, nodes: &[&str], fallback: &[&str]) -> Self {
        self.failure_with(nodes, &format!("fallback = {}", list(fallback)))
    }

    /// Failure rule with raw `key = value` lines (`fallback` included).
    pub fn failure_with(mut self, nodes: &[&str], lines: &str) -> Self {
        self.failures.push(format!(
            "[[flow-definitions.failures]]\nnodes = {}\n{lines}\n",
            list(nodes)
        ));
        self
    }

    /// A flow-level `key = value` line.
    pub fn set(mut self, line: &str) -> Self {
        self.settings.push(line.to_string());
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = format!("[[flow-definitions]]\nname = {:?}\n", self.name);
        for line in &self.settings {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        for block in self.edges.iter().chain(self.failures.iter()) {
            out.push_str(block);
            out.push('\n');
        }
        out
    }
}

/// Render several flows into one flow document.
pub fn flows_toml(flows: &[FlowBuilder]) -> String {
    flows.iter().map(FlowBuilder::to_toml).collect::<Vec<_>>().join("\n")
}

pub fn flow_document(flows: &[FlowBuilder]) -> FlowDocument {
    flows_from_str(&flows_toml(flows)).expect("builder renders a valid flow document")
}

/// Nodes plus one flow document, through the structural checks.
pub fn config_set(nodes: &NodesBuilder, flows: &[FlowBuilder]) -> Result<ConfigSet> {
    ConfigSet::try_from(RawConfigSet {
        nodes: nodes.build(),
        flows: vec![flow_document(flows)],
    })
}
