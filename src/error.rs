//! Error types for the pool reconciler
//!
//! Provides structured error types for the topology codec, property
//! reconciliation, the lifecycle controller and the command layer adapters.

use std::fmt;
use thiserror::Error;

/// Unified error type for the reconciler
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Declaration Errors
    // =========================================================================
    #[error("Invalid pool topology: {0}")]
    Topology(String),

    #[error("Property declared more than once: {name}")]
    PropertyConflict { name: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Failed to create pool {pool}: {reason}")]
    PoolCreation { pool: String, reason: String },

    #[error("Pool not found: {pool}")]
    PoolNotFound { pool: String },

    #[error("Failed to update pool {pool}: {}", join_failures(.failures))]
    PoolMutation {
        pool: String,
        failures: Vec<MutationFailure>,
    },

    #[error("Failed to destroy pool {pool}: {reason}")]
    PoolDestruction { pool: String, reason: String },

    // =========================================================================
    // Command Layer Errors
    // =========================================================================
    #[error("Command `{command}` failed (status {}): {stderr}", format_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to parse command output: {0}")]
    Parse(String),

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("State file error: {0}")]
    State(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single failed sub-operation of a pool update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationFailure {
    pub operation: MutationOp,
    pub reason: String,
}

/// Update sub-operations that can fail independently
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    Rename { from: String, to: String },
    SetProperty { name: String },
    ResetProperty { name: String },
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOp::Rename { from, to } => write!(f, "rename {} -> {}", from, to),
            MutationOp::SetProperty { name } => write!(f, "set {}", name),
            MutationOp::ResetProperty { name } => write!(f, "reset {}", name),
        }
    }
}

impl fmt::Display for MutationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.reason)
    }
}

fn format_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

fn join_failures(failures: &[MutationFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// True when the error only says the pool is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::PoolNotFound { .. })
    }

    /// Check if this error came from the user's declaration rather than the system
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Error::Topology(_) | Error::PropertyConflict { .. } | Error::Configuration(_)
        )
    }

    /// Process exit code used by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Topology(_) | Error::PropertyConflict { .. } | Error::Configuration(_) => 2,
            Error::PoolNotFound { .. } => 3,
            Error::State(_) | Error::Json(_) | Error::Yaml(_) | Error::Io(_) => 4,
            _ => 1,
        }
    }
}

/// Result type alias for the reconciler
pub type Result<T> = std::result::Result<T, Error>;
