// src/system/validate.rs

//! Per-flow consistency checks.
//!
//! Every flow is checked, each failing flow is logged, and the first error is
//! returned so the caller sees one concrete problem while the log shows all
//! of them.

use std::collections::BTreeSet;

use tracing::{error, warn};

use crate::errors::{FlowdagError, Result};
use crate::graph::{Fallback, Flow, NodeKind};
use crate::system::System;

pub fn validate_flows(system: &System) -> Result<()> {
    let mut first_err = None;

    for flow in system.flows() {
        if let Err(e) = validate_flow(system, flow) {
            error!(flow = %flow.name, error = %e, "flow failed validation");
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn validate_flow(system: &System, flow: &Flow) -> Result<()> {
    check_starting_edges(flow)?;
    check_sources_reachable(system, flow)?;
    check_duplicate_edges(flow)?;
    check_nowait(flow)?;
    check_eager_failures(flow)?;
    check_failure_nodes(flow)?;
    check_propagation(system, flow)?;
    check_selective(system, flow)?;
    Ok(())
}

fn err(flow: &Flow, msg: impl std::fmt::Display) -> FlowdagError {
    FlowdagError::config(format!("flow '{}': {msg}", flow.name))
}

fn check_starting_edges(flow: &Flow) -> Result<()> {
    let starting = flow.starting_edges().count();
    if starting == 0 {
        return Err(err(flow, "no starting edge (an edge with an empty 'from')"));
    }
    if flow.node_args_from_first && starting > 1 {
        return Err(err(
            flow,
            format!("node_args_from_first requires a single starting edge, found {starting}"),
        ));
    }
    if flow.node_args_from_first {
        let first = flow.starting_edges().flat_map(|e| e.nodes_to.iter()).count();
        if first != 1 {
            return Err(err(
                flow,
                "node_args_from_first requires the starting edge to have exactly one destination",
            ));
        }
    }
    Ok(())
}

/// Every node a flow waits on must be started somewhere in the flow.
fn check_sources_reachable(system: &System, flow: &Flow) -> Result<()> {
    let destinations = flow.all_destination_nodes();
    for node in flow.all_source_nodes() {
        if destinations.contains(node) {
            continue;
        }
        match system.kind_of(node) {
            Some(NodeKind::Flow) => warn!(
                flow = %flow.name,
                node = %node,
                "sub-flow is used as a source but never started in this flow"
            ),
            _ => {
                return Err(err(
                    flow,
                    format!("task '{node}' is used as a source but is never started in the flow"),
                ));
            }
        }
    }
    Ok(())
}

fn check_duplicate_edges(flow: &Flow) -> Result<()> {
    let mut seen: BTreeSet<(BTreeSet<&str>, BTreeSet<&str>)> = BTreeSet::new();
    for edge in &flow.edges {
        let key = (
            edge.nodes_from.iter().map(String::as_str).collect(),
            edge.nodes_to.iter().map(String::as_str).collect(),
        );
        if !seen.insert(key) {
            return Err(err(
                flow,
                format!(
                    "duplicate edge from {:?} to {:?}",
                    edge.nodes_from, edge.nodes_to
                ),
            ));
        }
    }
    Ok(())
}

fn check_nowait(flow: &Flow) -> Result<()> {
    let destinations = flow.all_destination_nodes();
    let sources = flow.all_source_nodes();
    for node in &flow.nowait {
        if !destinations.contains(node.as_str()) {
            return Err(err(
                flow,
                format!("nowait node '{node}' is never started in the flow"),
            ));
        }
        if sources.contains(node.as_str()) {
            return Err(err(
                flow,
                format!(
                    "nowait node '{node}' cannot be a source of an edge or a failure rule, the \
                     flow does not wait for it"
                ),
            ));
        }
    }
    Ok(())
}

fn check_eager_failures(flow: &Flow) -> Result<()> {
    let used = flow.all_used_nodes();
    for node in &flow.eager_failures {
        if !used.contains(node.as_str()) {
            return Err(err(
                flow,
                format!("eager failure node '{node}' is not used in the flow"),
            ));
        }
        if flow.nowait.contains(node) {
            return Err(err(
                flow,
                format!("node '{node}' cannot be both nowait and an eager failure"),
            ));
        }
        if flow.failure_rules.iter().any(|r| r.nodes.contains(node)) {
            return Err(err(
                flow,
                format!("eager failure node '{node}' also has a fallback rule"),
            ));
        }
    }
    Ok(())
}

fn check_failure_nodes(flow: &Flow) -> Result<()> {
    let edge_destinations: BTreeSet<&str> = flow
        .edges
        .iter()
        .flat_map(|e| e.nodes_to.iter().map(String::as_str))
        .collect();
    let fallbacks = flow.fallback_nodes();

    for rule in &flow.failure_rules {
        for node in &rule.nodes {
            if !edge_destinations.contains(node.as_str()) && !fallbacks.contains(node.as_str()) {
                return Err(err(
                    flow,
                    format!("failure rule for '{node}' which is never started in the flow"),
                ));
            }
        }
        if let Fallback::Nodes(nodes) = &rule.fallback {
            let mut seen = BTreeSet::new();
            for node in nodes {
                if !seen.insert(node.as_str()) {
                    return Err(err(
                        flow,
                        format!("fallback node '{node}' is listed twice in one rule"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_propagation(system: &System, flow: &Flow) -> Result<()> {
    let sub_flows = system.sub_flows_of(flow);

    for (key, flag) in flow.propagation_flags() {
        for node in flag.named_nodes() {
            if !sub_flows.contains(node) {
                return Err(err(
                    flow,
                    format!("{key} names '{node}' which is not a sub-flow of this flow"),
                ));
            }
        }
        if flag.is_set() && sub_flows.is_empty() {
            warn!(flow = %flow.name, flag = key, "propagation flag has no effect without sub-flows");
        }
    }

    for sub in &sub_flows {
        if flow.should_propagate_finished(sub) && flow.should_propagate_compound_finished(sub) {
            return Err(err(
                flow,
                format!(
                    "propagate_finished and propagate_compound_finished both apply to '{sub}'"
                ),
            ));
        }
        if flow.should_propagate_failures(sub) && flow.should_propagate_compound_failures(sub) {
            return Err(err(
                flow,
                format!(
                    "propagate_failures and propagate_compound_failures both apply to '{sub}'"
                ),
            ));
        }
    }
    Ok(())
}

fn check_selective(system: &System, flow: &Flow) -> Result<()> {
    for edge in &flow.edges {
        let Some(selective) = &edge.selective else {
            continue;
        };
        // Edge::check guarantees a single flow destination.
        let Some(target) = edge.nodes_to.first().and_then(|n| system.flow(n)) else {
            return Err(err(flow, "selective edge does not target a flow"));
        };

        for task in &selective.tasks {
            if !system.flow_runs_task(target, task, selective.follow_subflows) {
                let scope = if selective.follow_subflows {
                    "or any of its sub-flows"
                } else {
                    "(follow_subflows is off)"
                };
                return Err(err(
                    flow,
                    format!(
                        "selective run of '{}' requests '{task}' which is not run by that flow {scope}",
                        target.name
                    ),
                ));
            }
        }

        for named in selective.run_subsequent.named_nodes() {
            if system.kind_of(named) != Some(NodeKind::Flow) {
                return Err(err(
                    flow,
                    format!("run_subsequent names '{named}' which is not a flow"),
                ));
            }
        }
    }
    Ok(())
}
