//! Resource State
//!
//! What the host remembers about a managed pool between runs, and the file
//! store that persists it as JSON.

use crate::controller::PoolState;
use crate::domain::pool::PropertyMode;
use crate::error::{Error, Result};
use crate::properties::{DeclaredProperties, PropertyDrift};
use crate::topology::{DeviceBlock, MirrorBlock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Resource State
// =============================================================================

/// Recorded state of one pool resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolResourceState {
    /// Pool GUID
    pub id: String,

    /// Pool name as last observed
    pub name: String,

    #[serde(default)]
    pub property_mode: PropertyMode,

    /// Layout as last applied
    #[serde(default)]
    pub device: Vec<DeviceBlock>,

    #[serde(default)]
    pub mirror: Vec<MirrorBlock>,

    /// Last known values of the declared properties
    #[serde(default)]
    pub property: DeclaredProperties,

    /// Observed display values
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Observed raw values
    #[serde(default)]
    pub raw_properties: BTreeMap<String, String>,

    /// Layout as reported by the subsystem
    #[serde(default)]
    pub observed_device: Vec<DeviceBlock>,

    #[serde(default)]
    pub observed_mirror: Vec<MirrorBlock>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drift: Vec<PropertyDrift>,

    #[serde(default)]
    pub last_reconcile_time: Option<DateTime<Utc>>,
}

impl PoolResourceState {
    /// Record a freshly created or imported pool with its applied layout
    pub fn new(state: PoolState, device: Vec<DeviceBlock>, mirror: Vec<MirrorBlock>) -> Self {
        let mut record = Self {
            id: String::new(),
            name: String::new(),
            property_mode: state.mode,
            device,
            mirror,
            property: DeclaredProperties::new(),
            properties: BTreeMap::new(),
            raw_properties: BTreeMap::new(),
            observed_device: Vec::new(),
            observed_mirror: Vec::new(),
            drift: Vec::new(),
            last_reconcile_time: None,
        };
        record.refresh(state);
        record
    }

    /// Overwrite everything observed, keeping the applied layout
    pub fn refresh(&mut self, state: PoolState) {
        self.id = state.guid;
        self.name = state.name;
        self.property_mode = state.mode;
        self.property = state.tracked;
        self.properties = state.display.properties;
        self.raw_properties = state.display.raw_properties;
        self.observed_device = state.display.device;
        self.observed_mirror = state.display.mirror;
        self.drift = state.drift;
        self.last_reconcile_time = Some(Utc::now());
    }
}

// =============================================================================
// State Store
// =============================================================================

/// JSON file holding the state of one pool resource
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the recorded state, `None` when nothing is recorded
    pub async fn load(&self) -> Result<Option<PoolResourceState>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if text.trim().is_empty() {
            return Ok(None);
        }

        let state: PoolResourceState = serde_json::from_str(&text).map_err(|e| {
            Error::State(format!("invalid state file {}: {}", self.path.display(), e))
        })?;

        if state.id.is_empty() {
            return Err(Error::State(format!(
                "state file {} has no pool id",
                self.path.display()
            )));
        }

        Ok(Some(state))
    }

    /// Persist state, replacing the file atomically
    pub async fn save(&self, state: &PoolResourceState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Saved state for pool {} to {}", state.name, self.path.display());
        Ok(())
    }

    /// Forget the recorded pool
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
