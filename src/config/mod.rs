// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] defines the TOML-backed data model.
//! - [`loader`] reads documents from disk or strings.
//! - [`validate`] checks naming and namespace invariants and turns a
//!   [`RawConfigSet`] into a [`ConfigSet`].
//! - [`global`] holds the resolved `[global]` settings.

pub mod global;
pub mod loader;
pub mod model;
pub mod validate;

pub use global::GlobalConfig;
pub use loader::{flows_from_str, load_and_validate, load_from_paths, nodes_from_str};
pub use model::{
    CacheConfig, EdgeConfig, FailureConfig, FallbackConfig, FlowDefinition, FlowDocument,
    NodesDocument, OneOrMany, Propagate, StorageConfig, TaskConfig,
};

/// Documents as read, before any validation.
#[derive(Debug, Clone, Default)]
pub struct RawConfigSet {
    pub nodes: NodesDocument,
    pub flows: Vec<FlowDocument>,
}

/// Documents that passed the structural checks in [`validate`].
///
/// Only constructible through `TryFrom<RawConfigSet>`.
#[derive(Debug, Clone)]
pub struct ConfigSet {
    nodes: NodesDocument,
    flows: Vec<FlowDefinition>,
}

impl ConfigSet {
    pub(crate) fn new_unchecked(nodes: NodesDocument, flows: Vec<FlowDefinition>) -> Self {
        Self { nodes, flows }
    }

    pub fn nodes(&self) -> &NodesDocument {
        &self.nodes
    }

    /// Flow definitions, in the order the nodes document declares them.
    pub fn flow_definitions(&self) -> &[FlowDefinition] {
        &self.flows
    }
}
