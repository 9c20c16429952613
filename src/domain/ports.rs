//! Domain Ports - the storage command layer boundary
//!
//! The lifecycle controller talks to the storage subsystem only through
//! [`PoolCommands`]. Adapters implement it against the real `zpool` binary or
//! an in-memory fake.

use crate::domain::pool::Pool;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// Request Types
// =============================================================================

/// Everything the create command needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationSpec {
    /// Pool name
    pub name: String,
    /// Encoded vdev specification, e.g. `/dev/sda mirror /dev/sdb /dev/sdc`
    pub vdev_spec: String,
    /// Initial property assignments
    pub properties: BTreeMap<String, String>,
    /// Pass `-f` to override in-use device checks
    pub force: bool,
}

/// Which properties a describe call should fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertySelection {
    /// Only these properties; an empty set fetches none
    Named(BTreeSet<String>),
    /// Every property the subsystem reports
    All,
}

impl PropertySelection {
    pub fn none() -> Self {
        PropertySelection::Named(BTreeSet::new())
    }

    pub fn includes(&self, name: &str) -> bool {
        match self {
            PropertySelection::Named(names) => names.contains(name),
            PropertySelection::All => true,
        }
    }
}

// =============================================================================
// Pool Command Port
// =============================================================================

/// Port for storage subsystem operations
///
/// Missing pools are reported as [`crate::Error::PoolNotFound`] so callers can
/// tell drift apart from real failures.
#[async_trait]
pub trait PoolCommands: Send + Sync {
    /// Describe a pool by name: identity, topology and selected properties
    async fn describe(&self, pool_name: &str, selection: &PropertySelection) -> Result<Pool>;

    /// Create a pool and return its description
    async fn create(&self, spec: &CreationSpec) -> Result<Pool>;

    /// Destroy a pool
    async fn destroy(&self, pool_name: &str) -> Result<()>;

    /// Rename a pool
    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Find the current name of the pool carrying `guid`
    async fn resolve_name_by_guid(&self, guid: &str) -> Result<String>;

    /// Set a single property
    async fn set_property(&self, pool_name: &str, property: &str, value: &str) -> Result<()>;

    /// Restore a property to the subsystem default
    async fn reset_property(&self, pool_name: &str, property: &str) -> Result<()>;

    /// Adapter name for logs
    fn backend_name(&self) -> &str;
}

pub type PoolCommandsRef = Arc<dyn PoolCommands>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_selection_includes() {
        let named = PropertySelection::Named(["autotrim".to_string()].into_iter().collect());
        assert!(named.includes("autotrim"));
        assert!(!named.includes("size"));
        assert!(PropertySelection::All.includes("size"));
        assert!(!PropertySelection::none().includes("size"));
    }
}
