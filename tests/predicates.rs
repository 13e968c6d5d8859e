// tests/predicates.rs

use std::collections::BTreeMap;

use serde_json::{Value, json};

use flowdag::compile;
use flowdag::registry::{
    FunctionRef, FunctionRegistry, MESSAGE_PARAM, PredicateCall, PredicateDescriptor, PredicateFn,
};
use flowdag::system::DispatchTable;
use flowdag_test_utils::builders::{FlowBuilder, NodesBuilder, config_set};

fn table_with_condition(registry: &FunctionRegistry, condition: &str) -> DispatchTable {
    let nodes = NodesBuilder::new()
        .flow("main")
        .task_with_storage("A", "Redis")
        .task_with_storage("B", "Redis")
        .task("C")
        .storage("Redis");
    let flow = FlowBuilder::new("main")
        .edge(&[], &["A", "B"])
        .edge_if(&["A", "B"], &["C"], condition);
    let config = config_set(&nodes, &[flow]).expect("structurally valid");
    compile(&config, registry).expect("compiles")
}

fn results(a: Value, b: Value) -> BTreeMap<String, Value> {
    BTreeMap::from([("A".to_string(), a), ("B".to_string(), b)])
}

#[test]
fn nested_condition_over_two_sources() {
    let registry = FunctionRegistry::with_builtins();
    let table = table_with_condition(
        &registry,
        r#"{ or = [
            { and = [
                { name = "fieldEqual", node = "A", args = { key = ["meta", "state"], value = "done" } },
                { not = { name = "fieldExist", node = "B", args = { key = "error" } } },
            ] },
            { name = "argsFieldEqual", args = { key = "force", value = true } },
        ] }"#,
    );
    let main = table.flow("main").unwrap();
    let edge = &main.edges[1];

    assert_eq!(
        edge.condition_str,
        r#"((fieldEqual(A, key=["meta","state"], value="done") and (not fieldExist(B, key="error"))) or argsFieldEqual(key="force", value=true))"#
    );

    let ok = results(json!({"meta": {"state": "done"}}), json!({}));
    assert!(main.should_fire(1, &registry, &ok, None).unwrap());

    let errored = results(json!({"meta": {"state": "done"}}), json!({"error": "boom"}));
    assert!(!main.should_fire(1, &registry, &errored, None).unwrap());

    let forced = json!({"force": true});
    assert!(main.should_fire(1, &registry, &errored, Some(&forced)).unwrap());
}

#[test]
fn implicit_binding_needs_a_single_source() {
    let registry = FunctionRegistry::with_builtins();
    let nodes = NodesBuilder::new()
        .flow("main")
        .task_with_storage("A", "Redis")
        .task_with_storage("B", "Redis")
        .task("C")
        .storage("Redis");
    let flow = FlowBuilder::new("main")
        .edge(&[], &["A", "B"])
        .edge_if(&["A", "B"], &["C"], r#"{ name = "fieldExist", args = { key = "x" } }"#);
    let config = config_set(&nodes, &[flow]).unwrap();

    let err = compile(&config, &registry).unwrap_err();
    assert!(err.is_configuration_error());
    assert!(err.to_string().contains("2 source nodes"), "{err}");
}

fn has_items(call: &PredicateCall<'_>) -> flowdag::errors::Result<bool> {
    Ok(call
        .message
        .and_then(|m| m.get("items"))
        .and_then(Value::as_array)
        .is_some_and(|items| !items.is_empty()))
}

#[test]
fn user_registered_predicate_in_custom_module() {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register_predicate(
        FunctionRef::new("app.predicates", "hasItems"),
        PredicateDescriptor::new(&[MESSAGE_PARAM], Some(has_items as PredicateFn)),
    );

    let table = table_with_condition(
        &registry,
        r#"{ name = "hasItems", import = "app.predicates", node = "B" }"#,
    );
    let main = table.flow("main").unwrap();

    let with_items = results(json!({}), json!({"items": [1]}));
    assert!(main.should_fire(1, &registry, &with_items, None).unwrap());

    let without = results(json!({}), json!({"items": []}));
    assert!(!main.should_fire(1, &registry, &without, None).unwrap());

    // A consumer without the custom predicate cannot evaluate the table.
    let builtins_only = FunctionRegistry::with_builtins();
    let err = main
        .should_fire(1, &builtins_only, &with_items, None)
        .unwrap_err();
    assert!(!err.is_configuration_error());
}

fn always_yes(_: &PredicateCall<'_>) -> flowdag::errors::Result<bool> {
    Ok(true)
}

#[test]
fn predicates_module_can_be_overridden() {
    let mut registry = FunctionRegistry::with_builtins();
    registry.register_predicate(
        FunctionRef::new("app.predicates", "alwaysTrue"),
        PredicateDescriptor::new(&[], Some(always_yes as PredicateFn)),
    );

    let nodes = NodesBuilder::new()
        .flow("main")
        .global("predicates_module = \"app.predicates\"")
        .task("A")
        .task("B");
    let flow = FlowBuilder::new("main")
        .edge(&[], &["A"])
        .edge_if(&["A"], &["B"], r#"{ name = "alwaysTrue" }"#);
    let config = config_set(&nodes, &[flow]).unwrap();
    let table = compile(&config, &registry).unwrap();

    match &table.flow("main").unwrap().edges[1].condition {
        flowdag::graph::PredicateExpr::Leaf { function, .. } => {
            assert_eq!(function.module, "app.predicates");
        }
        other => panic!("expected a leaf, got {other:?}"),
    }
}
