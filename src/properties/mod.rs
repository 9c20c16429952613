//! Property Reconciliation Engine
//!
//! Declared property parsing, update diffs, drift detection and the
//! catalog of read-only and resettable pool properties.

pub mod catalog;
pub mod reconcile;

pub use reconcile::*;
