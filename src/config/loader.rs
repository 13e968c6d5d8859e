// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{FlowDocument, NodesDocument};
use crate::config::{ConfigSet, RawConfigSet};
use crate::errors::Result;

/// Load a nodes document from a given path.
///
/// This only performs TOML deserialization; semantic validation happens in
/// [`load_and_validate`] and later in [`crate::system::System`].
pub fn load_nodes(path: impl AsRef<Path>) -> Result<NodesDocument> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading nodes document");
    let contents = fs::read_to_string(path)?;
    nodes_from_str(&contents)
}

/// Load a flow document from a given path.
pub fn load_flows(path: impl AsRef<Path>) -> Result<FlowDocument> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading flow document");
    let contents = fs::read_to_string(path)?;
    flows_from_str(&contents)
}

pub fn nodes_from_str(contents: &str) -> Result<NodesDocument> {
    Ok(toml::from_str(contents)?)
}

pub fn flows_from_str(contents: &str) -> Result<FlowDocument> {
    Ok(toml::from_str(contents)?)
}

/// Load one nodes document plus any number of flow documents.
pub fn load_from_paths<P: AsRef<Path>>(nodes: P, flows: &[P]) -> Result<RawConfigSet> {
    let nodes = load_nodes(nodes)?;
    let flows = flows
        .iter()
        .map(|path| load_flows(path))
        .collect::<Result<Vec<_>>>()?;
    Ok(RawConfigSet { nodes, flows })
}

/// Load all documents and run the structural checks (names, namespace,
/// declared vs defined flows).
///
/// Graph-level consistency is checked when the [`ConfigSet`] is compiled
/// into a [`crate::system::System`].
pub fn load_and_validate<P: AsRef<Path>>(nodes: P, flows: &[P]) -> Result<ConfigSet> {
    let raw = load_from_paths(nodes, flows)?;
    ConfigSet::try_from(raw)
}
