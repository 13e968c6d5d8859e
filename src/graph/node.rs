// src/graph/node.rs

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::GlobalConfig;
use crate::graph::{Flow, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Task,
    Flow,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NodeKind::Task => f.write_str("task"),
            NodeKind::Flow => f.write_str("flow"),
        }
    }
}

/// Borrowed view of a graph vertex.
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Task(&'a Task),
    Flow(&'a Flow),
}

impl<'a> Node<'a> {
    pub fn name(&self) -> &'a str {
        match *self {
            Node::Task(task) => &task.name,
            Node::Flow(flow) => &flow.name,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match *self {
            Node::Task(_) => NodeKind::Task,
            Node::Flow(_) => NodeKind::Flow,
        }
    }

    /// Queue the node's messages go to; tasks fall back to the default task
    /// queue, flows (their dispatchers) to the default dispatcher queue.
    pub fn queue_name(&self, global: &'a GlobalConfig) -> &'a str {
        match *self {
            Node::Task(task) => task.queue.as_deref().unwrap_or(&global.default_task_queue),
            Node::Flow(flow) => flow
                .queue
                .as_deref()
                .unwrap_or(&global.default_dispatcher_queue),
        }
    }

    pub fn throttling(&self) -> Option<Duration> {
        match *self {
            Node::Task(task) => task.throttling,
            Node::Flow(flow) => flow.throttling,
        }
    }

    pub fn max_retry(&self) -> u32 {
        match *self {
            Node::Task(task) => task.max_retry,
            Node::Flow(flow) => flow.max_retry,
        }
    }

    pub fn retry_countdown(&self) -> u32 {
        match *self {
            Node::Task(task) => task.retry_countdown,
            Node::Flow(flow) => flow.retry_countdown,
        }
    }

    pub fn is_flow(&self) -> bool {
        matches!(self, Node::Flow(_))
    }

    pub fn as_task(&self) -> Option<&'a Task> {
        match *self {
            Node::Task(task) => Some(task),
            Node::Flow(_) => None,
        }
    }

    pub fn as_flow(&self) -> Option<&'a Flow> {
        match *self {
            Node::Flow(flow) => Some(flow),
            Node::Task(_) => None,
        }
    }
}
