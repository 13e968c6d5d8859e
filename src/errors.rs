// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// A compiled predicate or strategy could not be evaluated at run time.
    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

impl FlowdagError {
    /// Shorthand used throughout the compiler.
    pub fn config(msg: impl Into<String>) -> Self {
        FlowdagError::ConfigError(msg.into())
    }

    /// Whether this error stems from the declarative input (unreadable,
    /// malformed or inconsistent configuration).
    ///
    /// Every error the compiler itself raises is a configuration error; the
    /// JSON variant only appears when (de)serializing an emitted table and
    /// evaluation errors only at dispatch time.
    pub fn is_configuration_error(&self) -> bool {
        !matches!(
            self,
            FlowdagError::JsonError(_) | FlowdagError::EvaluationError(_)
        )
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        FlowdagError::EvaluationError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FlowdagError>;
