//! Pool Lifecycle Control
//!
//! The controller that drives a single pool through create, read, update,
//! delete and import against an injected command backend.

pub mod lifecycle;

pub use lifecycle::*;
