// src/graph/task.rs

use std::time::Duration;

use tracing::warn;

use crate::config::TaskConfig;
use crate::errors::{FlowdagError, Result};
use crate::registry::{FunctionRef, FunctionRegistry};

/// A leaf unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub name: String,
    /// Class implementing the task; several tasks may share one class.
    pub class_name: String,
    pub import: String,
    pub storage: Option<String>,
    pub storage_readonly: bool,
    /// Name results are stored under.
    pub storage_task_name: String,
    pub max_retry: u32,
    pub retry_countdown: u32,
    pub queue: Option<String>,
    pub throttling: Option<Duration>,
    /// Decides at run time whether a selectively run task really runs.
    pub selective_run_function: Option<FunctionRef>,
    pub output_schema: Option<String>,
}

impl Task {
    /// A task with defaults for everything but its name and module.
    pub fn named(name: &str, import: &str) -> Self {
        Self {
            name: name.to_string(),
            class_name: name.to_string(),
            import: import.to_string(),
            storage: None,
            storage_readonly: false,
            storage_task_name: name.to_string(),
            max_retry: 0,
            retry_countdown: 0,
            queue: None,
            throttling: None,
            selective_run_function: None,
            output_schema: None,
        }
    }

    pub fn from_config(cfg: &TaskConfig, registry: &FunctionRegistry) -> Result<Self> {
        let selective_run_function = match cfg.selective_run_function.as_ref() {
            Some(func) => {
                let func = FunctionRef::new(&func.import, &func.name);
                if !registry.has_selective_run(&func) {
                    return Err(FlowdagError::config(format!(
                        "task '{}': unknown selective run function '{}'",
                        cfg.name, func
                    )));
                }
                Some(func)
            }
            None => None,
        };

        if cfg.storage_readonly && cfg.storage.is_none() {
            return Err(FlowdagError::config(format!(
                "task '{}': storage_readonly is set but no storage is assigned",
                cfg.name
            )));
        }

        if cfg.storage_task_name.is_some() && cfg.storage.is_none() {
            warn!(
                task = %cfg.name,
                "storage_task_name has no effect without a storage"
            );
        }

        let throttling = cfg
            .throttling
            .map(|t| t.to_duration(&format!("task '{}'", cfg.name)))
            .transpose()?;
        if throttling == Some(Duration::ZERO) {
            warn!(task = %cfg.name, "zero throttling has no effect");
        }

        Ok(Self {
            name: cfg.name.clone(),
            class_name: cfg.classname.clone().unwrap_or_else(|| cfg.name.clone()),
            import: cfg.import.clone(),
            storage: cfg.storage.clone(),
            storage_readonly: cfg.storage_readonly,
            storage_task_name: cfg
                .storage_task_name
                .clone()
                .unwrap_or_else(|| cfg.name.clone()),
            max_retry: cfg.max_retry,
            retry_countdown: cfg.retry_countdown,
            queue: cfg.queue.clone(),
            throttling,
            selective_run_function,
            output_schema: cfg.output_schema.clone(),
        })
    }
}

/// Implementation shared by one or more task declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskClass {
    pub class_name: String,
    pub import: String,
    pub tasks: Vec<String>,
}
