// src/graph/predicate.rs

//! Edge and failure conditions.
//!
//! A condition is declared as a nested table:
//!
//! ```toml
//! condition = { and = [
//!     { name = "fieldEqual", node = "B", args = { key = "status", value = "ok" } },
//!     { not = { name = "argsIsNone" } },
//! ] }
//! ```
//!
//! [`Predicate::construct`] parses it against the function registry,
//! [`Predicate::check`] verifies the tree may be used where it is declared and
//! [`Predicate::to_expr`] produces the serializable form stored in the
//! dispatch table.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{FlowdagError, Result};
use crate::graph::{BuildContext, NodeKind};
use crate::registry::{FunctionRef, FunctionRegistry, PredicateCall, PredicateDescriptor, match_arguments};

const LEAF_KEYS: &[&str] = &["name", "node", "args", "import"];

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Leaf(Leaf),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    AlwaysTrue,
}

/// A call to a registered predicate function.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub function: FunctionRef,
    /// Node whose stored result is passed as the message.
    pub node: Option<String>,
    pub args: BTreeMap<String, Value>,
    requires_message: bool,
    requires_node_args: bool,
}

impl Leaf {
    pub fn new(
        function: FunctionRef,
        node: Option<String>,
        args: BTreeMap<String, Value>,
        descriptor: &PredicateDescriptor,
    ) -> Self {
        Self {
            function,
            node,
            args,
            requires_message: descriptor.requires_message(),
            requires_node_args: descriptor.requires_node_args(),
        }
    }
}

impl Predicate {
    /// Parse a condition tree.
    ///
    /// `nodes_from` are the source nodes of the edge (or the nodes of a
    /// failure rule); a message-inspecting leaf without an explicit `node` is
    /// bound to the only source node when there is exactly one.
    pub fn construct(
        tree: Option<&toml::Value>,
        nodes_from: &[String],
        flow: &str,
        ctx: &BuildContext<'_>,
    ) -> Result<Predicate> {
        match tree {
            None => Ok(Predicate::AlwaysTrue),
            Some(tree) => construct_node(tree, nodes_from, flow, ctx),
        }
    }

    /// Whether any leaf inspects the stored result of a node.
    pub fn requires_message(&self) -> bool {
        match self {
            Predicate::Leaf(leaf) => leaf.requires_message,
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().any(Predicate::requires_message)
            }
            Predicate::Not(child) => child.requires_message(),
            Predicate::AlwaysTrue => false,
        }
    }

    /// Whether any leaf inspects the flow's node arguments.
    pub fn requires_node_args(&self) -> bool {
        match self {
            Predicate::Leaf(leaf) => leaf.requires_node_args,
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().any(Predicate::requires_node_args)
            }
            Predicate::Not(child) => child.requires_node_args(),
            Predicate::AlwaysTrue => false,
        }
    }

    /// Nodes whose results are inspected, in tree order.
    pub fn inspected_nodes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_inspected(&mut out);
        out
    }

    fn collect_inspected<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Leaf(leaf) => {
                if let Some(node) = leaf.node.as_deref() {
                    if !out.contains(&node) {
                        out.push(node);
                    }
                }
            }
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_inspected(out);
                }
            }
            Predicate::Not(child) => child.collect_inspected(out),
            Predicate::AlwaysTrue => {}
        }
    }

    /// Verify the predicate may be used where it was declared.
    ///
    /// A message-inspecting leaf must be bound to a task listed in
    /// `nodes_from` that has a writable storage, and is not allowed at all
    /// where results cannot be inspected (starting edges, failure rules).
    pub fn check(
        &self,
        nodes_from: &[String],
        flow: &str,
        can_inspect_results: bool,
        ctx: &BuildContext<'_>,
    ) -> Result<()> {
        match self {
            Predicate::Leaf(leaf) => check_leaf(leaf, nodes_from, flow, can_inspect_results, ctx),
            Predicate::And(children) | Predicate::Or(children) => children
                .iter()
                .try_for_each(|c| c.check(nodes_from, flow, can_inspect_results, ctx)),
            Predicate::Not(child) => child.check(nodes_from, flow, can_inspect_results, ctx),
            Predicate::AlwaysTrue => Ok(()),
        }
    }

    /// Serializable, evaluable form for the dispatch table.
    pub fn to_expr(&self) -> PredicateExpr {
        match self {
            Predicate::Leaf(leaf) => PredicateExpr::Leaf {
                function: leaf.function.clone(),
                node: leaf.node.clone(),
                args: leaf.args.clone(),
                requires_message: leaf.requires_message,
                requires_node_args: leaf.requires_node_args,
            },
            Predicate::And(children) => PredicateExpr::And {
                children: children.iter().map(Predicate::to_expr).collect(),
            },
            Predicate::Or(children) => PredicateExpr::Or {
                children: children.iter().map(Predicate::to_expr).collect(),
            },
            Predicate::Not(child) => PredicateExpr::Not {
                child: Box::new(child.to_expr()),
            },
            Predicate::AlwaysTrue => PredicateExpr::AlwaysTrue,
        }
    }
}

fn construct_node(
    tree: &toml::Value,
    nodes_from: &[String],
    flow: &str,
    ctx: &BuildContext<'_>,
) -> Result<Predicate> {
    let table = tree.as_table().ok_or_else(|| {
        FlowdagError::config(format!(
            "flow '{flow}': condition must be a table, got {}",
            tree.type_str()
        ))
    })?;

    if table.is_empty() {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': empty condition"
        )));
    }

    for combinator in ["and", "or", "not"] {
        let Some(inner) = table.get(combinator) else {
            continue;
        };
        if table.len() != 1 {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': '{combinator}' must be the only key of its condition table"
            )));
        }
        return match (combinator, inner) {
            ("not", toml::Value::Array(_)) => Err(FlowdagError::config(format!(
                "flow '{flow}': 'not' expects a single condition, not a list"
            ))),
            ("not", child) => Ok(Predicate::Not(Box::new(construct_node(
                child, nodes_from, flow, ctx,
            )?))),
            (_, toml::Value::Array(items)) if !items.is_empty() => {
                let children = items
                    .iter()
                    .map(|item| construct_node(item, nodes_from, flow, ctx))
                    .collect::<Result<Vec<_>>>()?;
                Ok(if combinator == "and" {
                    Predicate::And(children)
                } else {
                    Predicate::Or(children)
                })
            }
            _ => Err(FlowdagError::config(format!(
                "flow '{flow}': '{combinator}' expects a non-empty list of conditions"
            ))),
        };
    }

    construct_leaf(table, nodes_from, flow, ctx)
}

fn construct_leaf(
    table: &toml::Table,
    nodes_from: &[String],
    flow: &str,
    ctx: &BuildContext<'_>,
) -> Result<Predicate> {
    if let Some(unknown) = table.keys().find(|k| !LEAF_KEYS.contains(&k.as_str())) {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': unrecognized condition key '{unknown}'"
        )));
    }

    let name = table
        .get("name")
        .and_then(toml::Value::as_str)
        .ok_or_else(|| {
            FlowdagError::config(format!(
                "flow '{flow}': condition leaf must have a string 'name'"
            ))
        })?;
    let module = match table.get("import") {
        None => ctx.global.predicates_module.as_str(),
        Some(toml::Value::String(module)) => module.as_str(),
        Some(_) => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': 'import' of predicate '{name}' must be a string"
            )));
        }
    };
    let function = FunctionRef::new(module, name);

    let descriptor = ctx.registry.predicate(&function).ok_or_else(|| {
        FlowdagError::config(format!("flow '{flow}': unknown predicate '{function}'"))
    })?;

    let args = match table.get("args") {
        None => BTreeMap::new(),
        Some(toml::Value::Table(args)) => args
            .iter()
            .map(|(k, v)| -> Result<(String, Value)> { Ok((k.clone(), serde_json::to_value(v)?)) })
            .collect::<Result<BTreeMap<_, _>>>()?,
        Some(_) => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': 'args' of predicate '{function}' must be a table"
            )));
        }
    };

    match_arguments(descriptor.explicit_params(), args.keys().map(String::as_str)).map_err(
        |detail| {
            FlowdagError::config(format!(
                "flow '{flow}': predicate '{function}' arguments do not match: {detail}"
            ))
        },
    )?;

    let node = match table.get("node") {
        None => None,
        Some(toml::Value::String(node)) => Some(node.clone()),
        Some(_) => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': 'node' of predicate '{function}' must be a string"
            )));
        }
    };

    let node = match (node, descriptor.requires_message()) {
        (Some(node), true) => Some(node),
        (None, true) if nodes_from.len() == 1 => Some(nodes_from[0].clone()),
        (None, true) => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': predicate '{function}' inspects a node result but no 'node' \
                 is given and the edge has {} source nodes",
                nodes_from.len()
            )));
        }
        (Some(node), false) => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': predicate '{function}' does not inspect results, \
                 but node '{node}' is given"
            )));
        }
        (None, false) => None,
    };

    Ok(Predicate::Leaf(Leaf::new(function, node, args, descriptor)))
}

fn check_leaf(
    leaf: &Leaf,
    nodes_from: &[String],
    flow: &str,
    can_inspect_results: bool,
    ctx: &BuildContext<'_>,
) -> Result<()> {
    if !leaf.requires_message {
        return Ok(());
    }

    let function = &leaf.function;
    let Some(node) = leaf.node.as_deref() else {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': predicate '{function}' inspects a result but is bound to no node"
        )));
    };

    if !can_inspect_results {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': predicate '{function}' cannot inspect results of '{node}' here \
             (starting edges and failure conditions have no results to inspect)"
        )));
    }

    if !nodes_from.iter().any(|n| n == node) {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': predicate '{function}' inspects '{node}' which is not a source node \
             of the edge"
        )));
    }

    match ctx.kind_of(node) {
        Some(NodeKind::Task) => {}
        Some(NodeKind::Flow) => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': predicate '{function}' cannot inspect results of sub-flow '{node}'"
            )));
        }
        None => {
            return Err(FlowdagError::config(format!(
                "flow '{flow}': predicate '{function}' references unknown node '{node}'"
            )));
        }
    }

    let task = ctx.task(node).ok_or_else(|| {
        FlowdagError::config(format!("flow '{flow}': unknown task '{node}'"))
    })?;
    if task.storage.is_none() {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': predicate '{function}' inspects results of task '{node}' \
             which has no storage assigned"
        )));
    }
    if task.storage_readonly {
        return Err(FlowdagError::config(format!(
            "flow '{flow}': predicate '{function}' inspects results of task '{node}' \
             whose storage is read-only"
        )));
    }

    Ok(())
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Leaf(leaf) => fmt_leaf(f, &leaf.function.name, leaf.node.as_deref(), &leaf.args),
            Predicate::And(children) => fmt_group(f, children, "and", "True"),
            Predicate::Or(children) => fmt_group(f, children, "or", "False"),
            Predicate::Not(child) => write!(f, "(not {child})"),
            Predicate::AlwaysTrue => f.write_str("True"),
        }
    }
}

fn fmt_leaf(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    node: Option<&str>,
    args: &BTreeMap<String, Value>,
) -> fmt::Result {
    let rendered: Vec<String> = node
        .map(|n| n.to_string())
        .into_iter()
        .chain(args.iter().map(|(k, v)| format!("{k}={v}")))
        .collect();
    write!(f, "{name}({})", rendered.join(", "))
}

fn fmt_group<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    children: &[T],
    op: &str,
    empty: &str,
) -> fmt::Result {
    match children {
        [] => f.write_str(empty),
        [only] => write!(f, "{only}"),
        _ => {
            let parts: Vec<String> = children.iter().map(|c| c.to_string()).collect();
            write!(f, "({})", parts.join(&format!(" {op} ")))
        }
    }
}

/// Source of stored node results during evaluation.
pub trait ResultSource {
    fn result(&self, node: &str) -> Option<&Value>;
}

impl ResultSource for BTreeMap<String, Value> {
    fn result(&self, node: &str) -> Option<&Value> {
        self.get(node)
    }
}

impl ResultSource for std::collections::HashMap<String, Value> {
    fn result(&self, node: &str) -> Option<&Value> {
        self.get(node)
    }
}

/// Compiled predicate as stored in the dispatch table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateExpr {
    Leaf {
        function: FunctionRef,
        node: Option<String>,
        args: BTreeMap<String, Value>,
        requires_message: bool,
        requires_node_args: bool,
    },
    And {
        children: Vec<PredicateExpr>,
    },
    Or {
        children: Vec<PredicateExpr>,
    },
    Not {
        child: Box<PredicateExpr>,
    },
    AlwaysTrue,
}

impl PredicateExpr {
    pub fn requires_message(&self) -> bool {
        match self {
            PredicateExpr::Leaf { requires_message, .. } => *requires_message,
            PredicateExpr::And { children } | PredicateExpr::Or { children } => {
                children.iter().any(PredicateExpr::requires_message)
            }
            PredicateExpr::Not { child } => child.requires_message(),
            PredicateExpr::AlwaysTrue => false,
        }
    }

    /// Evaluate against stored results and the flow's node arguments.
    ///
    /// `And`/`Or` short-circuit, so results of nodes behind a failed guard
    /// are never looked up.
    pub fn evaluate<R: ResultSource + ?Sized>(
        &self,
        registry: &FunctionRegistry,
        results: &R,
        node_args: Option<&Value>,
    ) -> Result<bool> {
        match self {
            PredicateExpr::Leaf {
                function,
                node,
                args,
                requires_message,
                ..
            } => {
                let descriptor = registry.predicate(function).ok_or_else(|| {
                    FlowdagError::evaluation(format!("predicate '{function}' is not registered"))
                })?;
                let eval = descriptor.eval.ok_or_else(|| {
                    FlowdagError::evaluation(format!(
                        "predicate '{function}' has no implementation in this registry"
                    ))
                })?;
                let message = match (requires_message, node.as_deref()) {
                    (true, Some(node)) => Some(results.result(node).ok_or_else(|| {
                        FlowdagError::evaluation(format!(
                            "predicate '{function}': no stored result for node '{node}'"
                        ))
                    })?),
                    _ => None,
                };
                eval(&PredicateCall {
                    message,
                    node_args,
                    args,
                })
            }
            PredicateExpr::And { children } => {
                for child in children {
                    if !child.evaluate(registry, results, node_args)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            PredicateExpr::Or { children } => {
                for child in children {
                    if child.evaluate(registry, results, node_args)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            PredicateExpr::Not { child } => Ok(!child.evaluate(registry, results, node_args)?),
            PredicateExpr::AlwaysTrue => Ok(true),
        }
    }
}

impl fmt::Display for PredicateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredicateExpr::Leaf {
                function,
                node,
                args,
                ..
            } => fmt_leaf(f, &function.name, node.as_deref(), args),
            PredicateExpr::And { children } => fmt_group(f, children, "and", "True"),
            PredicateExpr::Or { children } => fmt_group(f, children, "or", "False"),
            PredicateExpr::Not { child } => write!(f, "(not {child})"),
            PredicateExpr::AlwaysTrue => f.write_str("True"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use serde_json::json;

    use super::*;
    use crate::config::GlobalConfig;
    use crate::graph::Task;
    use crate::registry::PREDICATES_MODULE;

    fn leaf(name: &str, node: Option<&str>) -> Predicate {
        let registry = FunctionRegistry::with_builtins();
        let function = FunctionRef::new(PREDICATES_MODULE, name);
        let descriptor = registry.predicate(&function).expect("builtin");
        Predicate::Leaf(Leaf::new(
            function,
            node.map(str::to_string),
            BTreeMap::new(),
            descriptor,
        ))
    }

    fn parse(src: &str) -> toml::Value {
        let table: toml::Table = toml::from_str(src).expect("valid toml");
        table.get("condition").cloned().expect("condition key")
    }

    struct Fixture {
        global: GlobalConfig,
        registry: FunctionRegistry,
        tasks: BTreeMap<String, Task>,
        flows: BTreeSet<String>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut tasks = BTreeMap::new();
            let mut b = Task::named("B", "app.tasks");
            b.storage = Some("Redis".to_string());
            tasks.insert("B".to_string(), b);
            tasks.insert("A".to_string(), Task::named("A", "app.tasks"));
            Self {
                global: GlobalConfig::default(),
                registry: FunctionRegistry::with_builtins(),
                tasks,
                flows: ["sub".to_string()].into_iter().collect(),
            }
        }

        fn ctx(&self) -> BuildContext<'_> {
            BuildContext {
                global: &self.global,
                registry: &self.registry,
                tasks: &self.tasks,
                flow_names: &self.flows,
            }
        }
    }

    #[test]
    fn requires_message_is_transitive() {
        let msg = leaf("fieldEqual", Some("B"));
        let args = leaf("argsIsNone", None);

        assert!(!args.requires_message());
        assert!(args.requires_node_args());
        assert!(msg.requires_message());

        let nested = Predicate::Or(vec![
            args.clone(),
            Predicate::Not(Box::new(Predicate::And(vec![args.clone(), msg.clone()]))),
        ]);
        assert!(nested.requires_message());
        assert!(nested.requires_node_args());

        let without = Predicate::And(vec![args.clone(), Predicate::Not(Box::new(args))]);
        assert!(!without.requires_message());
    }

    #[test]
    fn rendering_parenthesizes_groups() {
        let a = leaf("alwaysTrue", None);
        let b = leaf("alwaysFalse", None);

        assert_eq!(
            Predicate::And(vec![a.clone(), b.clone()]).to_string(),
            "(alwaysTrue() and alwaysFalse())"
        );
        assert_eq!(Predicate::Or(vec![a.clone()]).to_string(), "alwaysTrue()");
        assert_eq!(
            Predicate::Not(Box::new(a.clone())).to_string(),
            "(not alwaysTrue())"
        );
        assert_eq!(Predicate::AlwaysTrue.to_string(), "True");
        assert_eq!(
            Predicate::And(vec![a.clone(), b.clone()]).to_expr().to_string(),
            Predicate::And(vec![a, b]).to_string()
        );
    }

    #[test]
    fn construct_binds_single_source_node() {
        let fx = Fixture::new();
        let tree = parse(
            r#"condition = { name = "fieldEqual", args = { key = "status", value = "ok" } }"#,
        );
        let p = Predicate::construct(Some(&tree), &["B".to_string()], "main", &fx.ctx()).unwrap();
        assert_eq!(p.inspected_nodes(), vec!["B"]);
        p.check(&["B".to_string()], "main", true, &fx.ctx()).unwrap();
        assert_eq!(p.to_string(), r#"fieldEqual(B, key="status", value="ok")"#);
    }

    #[test]
    fn construct_rejects_malformed_trees() {
        let fx = Fixture::new();
        let from = ["A".to_string()];

        let cases = [
            (r#"condition = { and = { name = "alwaysTrue" } }"#, "non-empty list"),
            (r#"condition = { or = [] }"#, "non-empty list"),
            (r#"condition = { not = [{ name = "alwaysTrue" }] }"#, "not a list"),
            (r#"condition = { name = "noSuchPredicate" }"#, "unknown predicate"),
            (r#"condition = { nmae = "alwaysTrue" }"#, "unrecognized condition key"),
            (r#"condition = {}"#, "empty condition"),
        ];

        for (src, needle) in cases {
            let tree = parse(src);
            let err = Predicate::construct(Some(&tree), &from, "main", &fx.ctx()).unwrap_err();
            assert!(err.to_string().contains(needle), "{src}: {err}");
        }
    }

    #[test]
    fn construct_reports_missing_and_unexpected_arguments() {
        let fx = Fixture::new();
        let tree = parse(
            r#"condition = { name = "fieldEqual", node = "B", args = { key = "k", vaule = 1 } }"#,
        );
        let err = Predicate::construct(Some(&tree), &["B".to_string()], "main", &fx.ctx())
            .unwrap_err()
            .to_string();
        assert!(err.contains("missing arguments: value"), "{err}");
        assert!(err.contains("unexpected arguments: vaule"), "{err}");
    }

    #[test]
    fn check_rejects_illegal_result_inspection() {
        let fx = Fixture::new();
        let ctx = fx.ctx();

        // Task without storage.
        let p = leaf("fieldExist", Some("A"));
        let err = p.check(&["A".to_string()], "main", true, &ctx).unwrap_err();
        assert!(err.to_string().contains("no storage"));

        // Starting edge.
        let p = leaf("fieldExist", Some("B"));
        assert!(p.check(&["B".to_string()], "main", false, &ctx).is_err());

        // Not a source node.
        assert!(p.check(&["A".to_string()], "main", true, &ctx).is_err());

        // Sub-flow.
        let p = leaf("fieldExist", Some("sub"));
        let err = p.check(&["sub".to_string()], "main", true, &ctx).unwrap_err();
        assert!(err.to_string().contains("sub-flow"));
    }

    #[test]
    fn evaluate_short_circuits() {
        let registry = FunctionRegistry::with_builtins();
        let mut args = BTreeMap::new();
        args.insert("key".to_string(), json!("status"));
        args.insert("value".to_string(), json!("ok"));
        let function = FunctionRef::new(PREDICATES_MODULE, "fieldEqual");
        let field_equal = Predicate::Leaf(Leaf::new(
            function.clone(),
            Some("B".to_string()),
            args,
            registry.predicate(&function).unwrap(),
        ));

        let mut results = BTreeMap::new();
        results.insert("B".to_string(), json!({"status": "ok"}));
        assert!(field_equal.to_expr().evaluate(&registry, &results, None).unwrap());

        // The right-hand side would fail (no result for B) if evaluated.
        let guarded = Predicate::And(vec![leaf("alwaysFalse", None), field_equal]);
        let empty: BTreeMap<String, Value> = BTreeMap::new();
        assert!(!guarded.to_expr().evaluate(&registry, &empty, None).unwrap());
    }
}
