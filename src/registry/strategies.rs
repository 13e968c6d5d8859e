// src/registry/strategies.rs

//! Built-in sampling strategies.
//!
//! A flow's dispatcher is re-scheduled periodically to check on its nodes; the
//! strategy decides how long to wait before the next check. Every strategy
//! stops sampling (`None`) once nothing is active.

use rand::Rng;
use serde_json::Value;

use crate::errors::{FlowdagError, Result};
use crate::registry::{FunctionRef, FunctionRegistry, StrategyCall, StrategyDescriptor, StrategyFn};

pub const STRATEGIES_MODULE: &str = "flowdag.strategies";

/// Strategy used when a flow does not configure `sampling`.
pub const DEFAULT_STRATEGY: &str = "biexponential_increase";
pub const DEFAULT_START_RETRY: u64 = 2;
pub const DEFAULT_MAX_RETRY: u64 = 120;

pub(crate) fn register_builtins(registry: &mut FunctionRegistry) {
    let builtins: &[(&str, &[&str], StrategyFn)] = &[
        ("constant", &["retry"], constant),
        ("linear_increase", &["start_retry", "max_retry", "step"], linear_increase),
        ("biexponential_increase", &["start_retry", "max_retry"], biexponential_increase),
        ("biexponential_decrease", &["start_retry", "stop_retry"], biexponential_decrease),
        ("random", &["start_retry", "max_retry"], random),
    ];

    for (name, params, eval) in builtins {
        registry.register_strategy(
            FunctionRef::new(STRATEGIES_MODULE, *name),
            StrategyDescriptor::new(params, Some(*eval)),
        );
    }
}

fn constant(call: &StrategyCall<'_>) -> Result<Option<u64>> {
    if call.active_nodes == 0 {
        return Ok(None);
    }
    Ok(Some(u64_arg(call, "retry")?))
}

fn linear_increase(call: &StrategyCall<'_>) -> Result<Option<u64>> {
    if call.active_nodes == 0 {
        return Ok(None);
    }
    let start = u64_arg(call, "start_retry")?;
    let max = u64_arg(call, "max_retry")?;
    let step = u64_arg(call, "step")?;

    Ok(Some(match call.previous_retry {
        None => start,
        Some(prev) => prev.saturating_add(step).min(max),
    }))
}

/// Doubles the interval while nothing new starts; falls back to
/// `start_retry` whenever new nodes or fallbacks were started.
fn biexponential_increase(call: &StrategyCall<'_>) -> Result<Option<u64>> {
    if call.active_nodes == 0 {
        return Ok(None);
    }
    let start = u64_arg(call, "start_retry")?;
    let max = u64_arg(call, "max_retry")?;

    if call.new_started_nodes > 0 || call.new_fallback_nodes > 0 {
        return Ok(Some(start));
    }
    Ok(Some(match call.previous_retry {
        None => start,
        Some(prev) => prev.saturating_mul(2).min(max),
    }))
}

/// Halves the interval while nothing new starts, never below `stop_retry`.
fn biexponential_decrease(call: &StrategyCall<'_>) -> Result<Option<u64>> {
    if call.active_nodes == 0 {
        return Ok(None);
    }
    let start = u64_arg(call, "start_retry")?;
    let stop = u64_arg(call, "stop_retry")?;

    if call.new_started_nodes > 0 || call.new_fallback_nodes > 0 {
        return Ok(Some(start));
    }
    Ok(Some(match call.previous_retry {
        None => start,
        Some(prev) => (prev / 2).max(stop),
    }))
}

fn random(call: &StrategyCall<'_>) -> Result<Option<u64>> {
    if call.active_nodes == 0 {
        return Ok(None);
    }
    let start = u64_arg(call, "start_retry")?;
    let max = u64_arg(call, "max_retry")?;
    if start > max {
        return Err(FlowdagError::evaluation(format!(
            "random strategy: start_retry ({start}) exceeds max_retry ({max})"
        )));
    }
    Ok(Some(rand::thread_rng().gen_range(start..=max)))
}

fn u64_arg(call: &StrategyCall<'_>, name: &str) -> Result<u64> {
    call.args
        .and_then(|args| args.get(name))
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            FlowdagError::evaluation(format!(
                "strategy argument '{name}' must be a non-negative integer"
            ))
        })
}
