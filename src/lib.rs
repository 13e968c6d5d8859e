// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod errors;
pub mod graph;
pub mod logging;
pub mod registry;
pub mod system;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigSet, load_and_validate};
use crate::registry::FunctionRegistry;
use crate::system::{DispatchTable, System};

/// Compile validated configuration into a dispatch table.
pub fn compile(config: &ConfigSet, registry: &FunctionRegistry) -> errors::Result<DispatchTable> {
    let system = System::build(config, registry)?;
    DispatchTable::from_system(&system)
}

/// High-level entry point used by `main.rs`.
///
/// Loads the nodes document and every flow document, builds and validates
/// the system against the built-in registry, then either prints a summary
/// (`--dry-run`) or writes the dispatch table as JSON.
pub fn run(args: CliArgs) -> Result<()> {
    let nodes_path = PathBuf::from(&args.nodes);
    let flow_paths: Vec<PathBuf> = args.flow.iter().map(PathBuf::from).collect();
    let flow_refs: Vec<&PathBuf> = flow_paths.iter().collect();

    let config = load_and_validate(&nodes_path, &flow_refs)
        .with_context(|| format!("loading configuration from {}", nodes_path.display()))?;

    let registry = FunctionRegistry::with_builtins();
    let table = compile(&config, &registry)?;

    if args.dry_run {
        print_dry_run(&table);
        return Ok(());
    }

    let json = table.to_json_pretty()?;
    match args.output.as_deref() {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing dispatch table to {path}"))?;
            info!(path = %path, fingerprint = %table.fingerprint, "dispatch table written");
        }
        None => println!("{json}"),
    }

    Ok(())
}

/// Dry-run output: flows, their edges and failure handling.
fn print_dry_run(table: &DispatchTable) {
    println!("flowdag dry-run");
    println!("  fingerprint = {}", table.fingerprint);
    println!("  default task queue = {}", table.global.default_task_queue);
    println!(
        "  default dispatcher queue = {}",
        table.global.default_dispatcher_queue
    );
    println!();

    println!("flows ({}):", table.flows.len());
    for (name, flow) in &table.flows {
        println!("  - {name} (queue: {})", flow.queue);
        for edge in &flow.edges {
            println!(
                "      {:?} -> {:?} if {}",
                edge.from, edge.to, edge.condition_str
            );
            if let Some(foreach) = &edge.foreach {
                println!("        foreach: {}", foreach.function);
            }
            if let Some(selective) = &edge.selective {
                println!("        selective: {:?}", selective.tasks);
            }
        }
        for (_, node) in flow.failures.iter().filter(|(_, n)| n.has_fallback()) {
            for entry in &node.fallbacks {
                println!(
                    "      on failure of {:?}: {:?} if {}",
                    node.traversed, entry.fallback, entry.condition_str
                );
            }
        }
        if !flow.nowait.is_empty() {
            println!("      nowait: {:?}", flow.nowait);
        }
        if !flow.eager_failures.is_empty() {
            println!("      eager_failures: {:?}", flow.eager_failures);
        }
    }
    println!();

    println!("tasks ({}):", table.tasks.len());
    for (name, task) in &table.tasks {
        println!("  - {name}");
        println!("      class: {}.{}", task.import, task.class_name);
        println!("      queue: {}", task.queue);
        if let Some(storage) = &task.storage {
            println!("      storage: {storage}");
        }
    }

    debug!("dry-run complete (no table written)");
}
