// src/config/validate.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::model::{FlowDefinition, NodesDocument};
use crate::config::{ConfigSet, RawConfigSet};
use crate::errors::{FlowdagError, Result};

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("node name pattern is valid")
});

/// Whether `name` is usable as a task, flow or storage name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

impl TryFrom<RawConfigSet> for ConfigSet {
    type Error = FlowdagError;

    fn try_from(raw: RawConfigSet) -> std::result::Result<Self, Self::Error> {
        validate_names(&raw.nodes)?;
        let flows = collect_flow_definitions(&raw)?;
        Ok(ConfigSet::new_unchecked(raw.nodes, flows))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Task,
    Flow,
    Storage,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Task => "task",
            Kind::Flow => "flow",
            Kind::Storage => "storage",
        }
    }
}

/// Tasks, flows and storages share a single namespace.
fn validate_names(nodes: &NodesDocument) -> Result<()> {
    let mut seen: HashMap<&str, Kind> = HashMap::new();

    let declared = nodes
        .tasks
        .iter()
        .map(|t| (t.name.as_str(), Kind::Task))
        .chain(nodes.flows.iter().map(|f| (f.as_str(), Kind::Flow)))
        .chain(nodes.storages.iter().map(|s| (s.name.as_str(), Kind::Storage)));

    for (name, kind) in declared {
        if !is_valid_name(name) {
            return Err(FlowdagError::config(format!(
                "invalid {} name '{}': names must match [A-Za-z_][A-Za-z0-9_]*",
                kind.as_str(),
                name
            )));
        }

        if let Some(previous) = seen.insert(name, kind) {
            return Err(FlowdagError::config(if previous == kind {
                format!("{} '{}' is declared multiple times", kind.as_str(), name)
            } else {
                format!(
                    "name '{}' is used by both a {} and a {}",
                    name,
                    previous.as_str(),
                    kind.as_str()
                )
            }));
        }
    }

    if nodes.flows.is_empty() {
        return Err(FlowdagError::config(
            "nodes document must declare at least one flow in `flows`",
        ));
    }

    Ok(())
}

/// Every declared flow must be defined exactly once and every definition
/// must be declared. Returns definitions in declaration order.
fn collect_flow_definitions(raw: &RawConfigSet) -> Result<Vec<FlowDefinition>> {
    let mut defined: BTreeMap<&str, &FlowDefinition> = BTreeMap::new();

    for def in raw.flows.iter().flat_map(|doc| doc.flow_definitions.iter()) {
        if defined.insert(def.name.as_str(), def).is_some() {
            return Err(FlowdagError::config(format!(
                "flow '{}' is defined multiple times",
                def.name
            )));
        }
        if !raw.nodes.flows.contains(&def.name) {
            return Err(FlowdagError::config(format!(
                "flow '{}' is defined but not declared in the nodes document",
                def.name
            )));
        }
    }

    let mut ordered = Vec::with_capacity(raw.nodes.flows.len());
    for name in &raw.nodes.flows {
        match defined.get(name.as_str()) {
            Some(def) => ordered.push((*def).clone()),
            None => {
                return Err(FlowdagError::config(format!(
                    "flow '{}' is declared but has no definition",
                    name
                )));
            }
        }
    }

    if ordered.iter().any(|def| def.edges.is_empty()) {
        // Reported with full context by the system validator.
        warn!("at least one flow definition has no edges");
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_pattern() {
        assert!(is_valid_name("Task_1"));
        assert!(is_valid_name("_hidden"));
        assert!(!is_valid_name("1task"));
        assert!(!is_valid_name("with-dash"));
        assert!(!is_valid_name(""));
    }
}
