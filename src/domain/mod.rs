//! Domain layer - Core pool types and port definitions
//!
//! This module defines the pool model and the command layer trait (port)
//! that adapters implement, following hexagonal architecture principles.

pub mod pool;
pub mod ports;

pub use pool::*;
pub use ports::*;
