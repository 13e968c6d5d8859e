// src/registry/predicates.rs

//! Built-in predicate library.
//!
//! Field predicates take a `key` argument: either a single key or a list of
//! keys/indices describing a path into the inspected JSON value.

use std::cmp::Ordering;

use serde_json::Value;

use crate::errors::{FlowdagError, Result};
use crate::registry::{
    FunctionRef, FunctionRegistry, MESSAGE_PARAM, NODE_ARGS_PARAM, PredicateCall,
    PredicateDescriptor, PredicateFn,
};

pub const PREDICATES_MODULE: &str = "flowdag.predicates";

pub(crate) fn register_builtins(registry: &mut FunctionRegistry) {
    let builtins: &[(&str, &[&str], PredicateFn)] = &[
        ("alwaysTrue", &[], always_true),
        ("alwaysFalse", &[], always_false),
        ("fieldExist", &[MESSAGE_PARAM, "key"], field_exist),
        ("fieldEqual", &[MESSAGE_PARAM, "key", "value"], field_equal),
        ("fieldContain", &[MESSAGE_PARAM, "key", "value"], field_contain),
        ("fieldLenEqual", &[MESSAGE_PARAM, "key", "length"], field_len_equal),
        ("fieldLenGreater", &[MESSAGE_PARAM, "key", "length"], field_len_greater),
        ("fieldLenLess", &[MESSAGE_PARAM, "key", "length"], field_len_less),
        ("fieldGreater", &[MESSAGE_PARAM, "key", "value"], field_greater),
        ("fieldLess", &[MESSAGE_PARAM, "key", "value"], field_less),
        ("argsFieldExist", &[NODE_ARGS_PARAM, "key"], args_field_exist),
        ("argsFieldEqual", &[NODE_ARGS_PARAM, "key", "value"], args_field_equal),
        ("argsFieldContain", &[NODE_ARGS_PARAM, "key", "value"], args_field_contain),
        ("argsFieldGreater", &[NODE_ARGS_PARAM, "key", "value"], args_field_greater),
        ("argsFieldLess", &[NODE_ARGS_PARAM, "key", "value"], args_field_less),
        ("argsIsNone", &[NODE_ARGS_PARAM], args_is_none),
    ];

    for (name, params, eval) in builtins {
        registry.register_predicate(
            FunctionRef::new(PREDICATES_MODULE, *name),
            PredicateDescriptor::new(params, Some(*eval)),
        );
    }
}

fn always_true(_: &PredicateCall<'_>) -> Result<bool> {
    Ok(true)
}

fn always_false(_: &PredicateCall<'_>) -> Result<bool> {
    Ok(false)
}

fn field_exist(call: &PredicateCall<'_>) -> Result<bool> {
    Ok(lookup(message(call)?, key(call)?).is_some())
}

fn field_equal(call: &PredicateCall<'_>) -> Result<bool> {
    let expected = arg(call, "value")?;
    Ok(lookup(message(call)?, key(call)?).is_some_and(|field| values_equal(field, expected)))
}

fn field_contain(call: &PredicateCall<'_>) -> Result<bool> {
    Ok(lookup(message(call)?, key(call)?)
        .map(|field| contains(field, arg_or_null(call, "value")))
        .unwrap_or(false))
}

fn field_len_equal(call: &PredicateCall<'_>) -> Result<bool> {
    compare_len(call, Ordering::Equal)
}

fn field_len_greater(call: &PredicateCall<'_>) -> Result<bool> {
    compare_len(call, Ordering::Greater)
}

fn field_len_less(call: &PredicateCall<'_>) -> Result<bool> {
    compare_len(call, Ordering::Less)
}

fn field_greater(call: &PredicateCall<'_>) -> Result<bool> {
    compare_field(message(call)?, call, Ordering::Greater)
}

fn field_less(call: &PredicateCall<'_>) -> Result<bool> {
    compare_field(message(call)?, call, Ordering::Less)
}

fn args_field_exist(call: &PredicateCall<'_>) -> Result<bool> {
    Ok(node_args(call).and_then(|a| lookup(a, key(call).ok()?)).is_some())
}

fn args_field_equal(call: &PredicateCall<'_>) -> Result<bool> {
    let expected = arg(call, "value")?;
    let key = key(call)?;
    Ok(node_args(call)
        .and_then(|a| lookup(a, key))
        .is_some_and(|field| values_equal(field, expected)))
}

fn args_field_contain(call: &PredicateCall<'_>) -> Result<bool> {
    let key = key(call)?;
    Ok(node_args(call)
        .and_then(|a| lookup(a, key))
        .map(|field| contains(field, arg_or_null(call, "value")))
        .unwrap_or(false))
}

fn args_field_greater(call: &PredicateCall<'_>) -> Result<bool> {
    match node_args(call) {
        Some(args) => compare_field(args, call, Ordering::Greater),
        None => Ok(false),
    }
}

fn args_field_less(call: &PredicateCall<'_>) -> Result<bool> {
    match node_args(call) {
        Some(args) => compare_field(args, call, Ordering::Less),
        None => Ok(false),
    }
}

fn args_is_none(call: &PredicateCall<'_>) -> Result<bool> {
    Ok(node_args(call).is_none())
}

fn message<'a>(call: &PredicateCall<'a>) -> Result<&'a Value> {
    call.message
        .ok_or_else(|| FlowdagError::evaluation("predicate requires a message but none was given"))
}

/// `null` node arguments are treated as absent.
fn node_args<'a>(call: &PredicateCall<'a>) -> Option<&'a Value> {
    call.node_args.filter(|v| !v.is_null())
}

fn arg<'a>(call: &PredicateCall<'a>, name: &str) -> Result<&'a Value> {
    call.args
        .get(name)
        .ok_or_else(|| FlowdagError::evaluation(format!("missing predicate argument '{name}'")))
}

fn arg_or_null<'a>(call: &PredicateCall<'a>, name: &str) -> &'a Value {
    call.args.get(name).unwrap_or(&Value::Null)
}

fn key<'a>(call: &PredicateCall<'a>) -> Result<&'a Value> {
    arg(call, "key")
}

/// Follow `key` (a single step or a list of steps) into `value`.
pub fn lookup<'a>(value: &'a Value, key: &Value) -> Option<&'a Value> {
    match key {
        Value::Array(path) => path.iter().try_fold(value, step),
        single => step(value, single),
    }
}

fn step<'a>(value: &'a Value, key: &Value) -> Option<&'a Value> {
    match (value, key) {
        (Value::Object(map), Value::String(k)) => map.get(k),
        (Value::Array(items), Value::Number(n)) => {
            n.as_u64().and_then(|i| items.get(usize::try_from(i).ok()?))
        }
        _ => None,
    }
}

fn contains(field: &Value, needle: &Value) -> bool {
    match (field, needle) {
        (Value::Array(items), _) => items.contains(needle),
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        (Value::Object(map), Value::String(k)) => map.contains_key(k),
        _ => false,
    }
}

fn len_of(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::String(s) => Some(s.chars().count()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn compare_len(call: &PredicateCall<'_>, wanted: Ordering) -> Result<bool> {
    let length = arg(call, "length")?
        .as_u64()
        .ok_or_else(|| FlowdagError::evaluation("argument 'length' must be a non-negative integer"))?;
    Ok(lookup(message(call)?, key(call)?)
        .and_then(len_of)
        .map(|len| (len as u64).cmp(&length) == wanted)
        .unwrap_or(false))
}

fn compare_field(source: &Value, call: &PredicateCall<'_>, wanted: Ordering) -> Result<bool> {
    let expected = arg(call, "value")?;
    let Some(field) = lookup(source, key(call)?) else {
        return Ok(false);
    };
    Ok(compare_values(field, expected) == Some(wanted))
}

/// Numbers compare by value, so `1` equals `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn field_equal_follows_paths() {
        let msg = json!({"status": {"code": "ok"}, "items": [1, 2, 3]});
        let a = args(&[("key", json!(["status", "code"])), ("value", json!("ok"))]);
        let call = PredicateCall {
            message: Some(&msg),
            node_args: None,
            args: &a,
        };
        assert!(field_equal(&call).unwrap());

        let a = args(&[("key", json!(["items", 1])), ("value", json!(2))]);
        let call = PredicateCall {
            message: Some(&msg),
            node_args: None,
            args: &a,
        };
        assert!(field_equal(&call).unwrap());
    }

    #[test]
    fn length_and_ordering() {
        let msg = json!({"items": [1, 2, 3], "score": 7.5});
        let a = args(&[("key", json!("items")), ("length", json!(2))]);
        let call = PredicateCall {
            message: Some(&msg),
            node_args: None,
            args: &a,
        };
        assert!(field_len_greater(&call).unwrap());
        assert!(!field_len_less(&call).unwrap());

        let a = args(&[("key", json!("score")), ("value", json!(5))]);
        let call = PredicateCall {
            message: Some(&msg),
            node_args: None,
            args: &a,
        };
        assert!(field_greater(&call).unwrap());
        assert!(!field_less(&call).unwrap());
    }

    #[test]
    fn missing_message_is_an_evaluation_error() {
        let a = args(&[("key", json!("x"))]);
        let call = PredicateCall {
            message: None,
            node_args: None,
            args: &a,
        };
        let err = field_exist(&call).unwrap_err();
        assert!(!err.is_configuration_error());
    }

    #[test]
    fn args_predicates_treat_null_as_absent() {
        let a = BTreeMap::new();
        let null = Value::Null;
        let call = PredicateCall {
            message: None,
            node_args: Some(&null),
            args: &a,
        };
        assert!(args_is_none(&call).unwrap());

        let node_args = json!({"tags": ["a", "b"]});
        let a = args(&[("key", json!("tags")), ("value", json!("b"))]);
        let call = PredicateCall {
            message: None,
            node_args: Some(&node_args),
            args: &a,
        };
        assert!(args_field_contain(&call).unwrap());
    }

    #[test]
    fn equality_compares_numbers_by_value() {
        let msg = json!({"count": 1.0, "label": "1"});
        let a = args(&[("key", json!("count")), ("value", json!(1))]);
        let call = PredicateCall {
            message: Some(&msg),
            node_args: None,
            args: &a,
        };
        assert!(field_equal(&call).unwrap());

        let a = args(&[("key", json!("label")), ("value", json!(1))]);
        let call = PredicateCall {
            message: Some(&msg),
            node_args: None,
            args: &a,
        };
        assert!(!field_equal(&call).unwrap());

        let node_args = json!({"retries": 3});
        let a = args(&[("key", json!("retries")), ("value", json!(3.0))]);
        let call = PredicateCall {
            message: None,
            node_args: Some(&node_args),
            args: &a,
        };
        assert!(args_field_equal(&call).unwrap());
    }
}
