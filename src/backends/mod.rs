//! Pool Command Backends
//!
//! Provides implementations of the pool command port:
//! - zpool: runs the `zpool` binary
//! - memory: in-process fake used by tests and benchmarks

pub mod memory;
pub mod zpool_cli;
pub mod zpool_output;

pub use memory::*;
pub use zpool_cli::*;

use crate::domain::ports::PoolCommandsRef;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Factory for creating pool command backends
pub struct BackendFactory;

impl BackendFactory {
    /// Create a backend by name
    pub fn create(name: &str, config: ZpoolCliConfig) -> Result<PoolCommandsRef> {
        match name.to_lowercase().as_str() {
            "zpool" | "cli" => Ok(Arc::new(ZpoolCli::new(config))),
            "memory" => Ok(Arc::new(InMemoryPools::new())),
            _ => Err(Error::Configuration(format!("unknown backend '{}'", name))),
        }
    }
}
