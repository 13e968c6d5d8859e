// src/registry/mod.rs

//! Explicit function registry.
//!
//! Predicates, foreach functions, selective-run functions, sampling
//! strategies and trace sinks are all referenced by `(module, name)` in the
//! configuration. The registry is populated once at start-up and consumed by
//! the compiler (to check that references exist and argument names match)
//! and by dispatchers (to evaluate compiled predicates and strategies).

pub mod predicates;
pub mod strategies;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

pub use predicates::PREDICATES_MODULE;
pub use strategies::STRATEGIES_MODULE;

/// Implicit predicate parameter receiving the stored result of the bound node.
pub const MESSAGE_PARAM: &str = "message";
/// Implicit predicate parameter receiving the flow's node arguments.
pub const NODE_ARGS_PARAM: &str = "node_args";

/// Name of a function together with the module it is registered under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionRef {
    pub module: String,
    pub name: String,
}

impl FunctionRef {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// Inputs to a predicate evaluation.
#[derive(Debug, Clone, Copy)]
pub struct PredicateCall<'a> {
    /// Stored result of the bound node, when the predicate inspects it.
    pub message: Option<&'a Value>,
    pub node_args: Option<&'a Value>,
    pub args: &'a BTreeMap<String, Value>,
}

pub type PredicateFn = fn(&PredicateCall<'_>) -> Result<bool>;

/// Signature of a registered predicate.
#[derive(Debug, Clone)]
pub struct PredicateDescriptor {
    /// All parameter names, implicit ones included.
    pub params: Vec<String>,
    /// Implementation; `None` for predicates only the dispatcher can run.
    pub eval: Option<PredicateFn>,
}

impl PredicateDescriptor {
    pub fn new(params: &[&str], eval: Option<PredicateFn>) -> Self {
        Self {
            params: params.iter().map(|p| p.to_string()).collect(),
            eval,
        }
    }

    pub fn requires_message(&self) -> bool {
        self.params.iter().any(|p| p == MESSAGE_PARAM)
    }

    pub fn requires_node_args(&self) -> bool {
        self.params.iter().any(|p| p == NODE_ARGS_PARAM)
    }

    /// Parameters that must be supplied through `args` in the configuration.
    pub fn explicit_params(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .map(String::as_str)
            .filter(|p| *p != MESSAGE_PARAM && *p != NODE_ARGS_PARAM)
    }
}

/// Snapshot of a flow's progress handed to a sampling strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyCall<'a> {
    /// Seconds used for the previous sampling, `None` on the first call.
    pub previous_retry: Option<u64>,
    pub active_nodes: usize,
    pub failed_nodes: usize,
    pub new_started_nodes: usize,
    pub new_fallback_nodes: usize,
    pub finished_nodes: usize,
    pub args: Option<&'a BTreeMap<String, Value>>,
}

/// Returns the number of seconds until the next sampling, or `None` to stop.
pub type StrategyFn = fn(&StrategyCall<'_>) -> Result<Option<u64>>;

#[derive(Debug, Clone)]
pub struct StrategyDescriptor {
    pub params: Vec<String>,
    pub eval: Option<StrategyFn>,
}

impl StrategyDescriptor {
    pub fn new(params: &[&str], eval: Option<StrategyFn>) -> Self {
        Self {
            params: params.iter().map(|p| p.to_string()).collect(),
            eval,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    predicates: HashMap<FunctionRef, PredicateDescriptor>,
    strategies: HashMap<FunctionRef, StrategyDescriptor>,
    foreach: BTreeSet<FunctionRef>,
    selective_run: BTreeSet<FunctionRef>,
    trace_sinks: BTreeSet<String>,
}

impl FunctionRegistry {
    /// Empty registry, without the built-in library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in predicates, strategies and
    /// the `logging` trace sink.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        predicates::register_builtins(&mut registry);
        strategies::register_builtins(&mut registry);
        registry.register_trace_sink("logging");
        registry
    }

    pub fn register_predicate(&mut self, func: FunctionRef, descriptor: PredicateDescriptor) {
        self.predicates.insert(func, descriptor);
    }

    pub fn register_strategy(&mut self, func: FunctionRef, descriptor: StrategyDescriptor) {
        self.strategies.insert(func, descriptor);
    }

    pub fn register_foreach(&mut self, func: FunctionRef) {
        self.foreach.insert(func);
    }

    pub fn register_selective_run(&mut self, func: FunctionRef) {
        self.selective_run.insert(func);
    }

    pub fn register_trace_sink(&mut self, name: impl Into<String>) {
        self.trace_sinks.insert(name.into());
    }

    pub fn predicate(&self, func: &FunctionRef) -> Option<&PredicateDescriptor> {
        self.predicates.get(func)
    }

    pub fn strategy(&self, func: &FunctionRef) -> Option<&StrategyDescriptor> {
        self.strategies.get(func)
    }

    pub fn has_foreach(&self, func: &FunctionRef) -> bool {
        self.foreach.contains(func)
    }

    pub fn has_selective_run(&self, func: &FunctionRef) -> bool {
        self.selective_run.contains(func)
    }

    pub fn has_trace_sink(&self, name: &str) -> bool {
        self.trace_sinks.contains(name)
    }
}

/// Check declared argument names against a parameter list.
///
/// Collects every missing and every unexpected name before failing so the
/// error message lists all of them at once.
pub fn match_arguments<'a>(
    expected: impl IntoIterator<Item = &'a str>,
    supplied: impl IntoIterator<Item = &'a str>,
) -> std::result::Result<(), String> {
    let expected: BTreeSet<&str> = expected.into_iter().collect();
    let supplied: BTreeSet<&str> = supplied.into_iter().collect();

    let missing: Vec<&str> = expected.difference(&supplied).copied().collect();
    let unexpected: Vec<&str> = supplied.difference(&expected).copied().collect();

    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }

    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing arguments: {}", missing.join(", ")));
    }
    if !unexpected.is_empty() {
        parts.push(format!("unexpected arguments: {}", unexpected.join(", ")));
    }
    Err(parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_arguments_reports_both_directions() {
        let err = match_arguments(["key", "value"], ["key", "other"]).unwrap_err();
        assert!(err.contains("missing arguments: value"));
        assert!(err.contains("unexpected arguments: other"));
    }

    #[test]
    fn match_arguments_accepts_exact_set() {
        assert!(match_arguments(["key", "value"], ["value", "key"]).is_ok());
    }

    #[test]
    fn builtins_are_registered() {
        let registry = FunctionRegistry::with_builtins();
        let field_equal = registry
            .predicate(&FunctionRef::new(PREDICATES_MODULE, "fieldEqual"))
            .expect("fieldEqual registered");
        assert!(field_equal.requires_message());
        assert!(!field_equal.requires_node_args());
        assert_eq!(
            field_equal.explicit_params().collect::<Vec<_>>(),
            vec!["key", "value"]
        );
        assert!(registry.has_trace_sink("logging"));
        assert!(
            registry
                .strategy(&FunctionRef::new(STRATEGIES_MODULE, "constant"))
                .is_some()
        );
    }
}
