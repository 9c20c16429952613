//! Property Reconciliation
//!
//! Decides which pool properties are owned, what must change to converge
//! them, and how an observed pool is presented back to the host.

use crate::domain::pool::{Pool, PropertyMode, PropertySource};
use crate::domain::ports::PropertySelection;
use crate::error::{Error, Result};
use crate::properties::catalog;
use crate::topology::{flatten_device, flatten_mirror, DeviceBlock, MirrorBlock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Desired property values keyed by property name
pub type DeclaredProperties = BTreeMap<String, String>;

// =============================================================================
// Declared Properties
// =============================================================================

/// One `property { name, value }` entry of a declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PropertyBlock {
    pub name: String,
    pub value: String,
}

impl PropertyBlock {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Distinct property names a declaration mentions
pub fn declared_property_names(blocks: &[PropertyBlock]) -> BTreeSet<String> {
    blocks.iter().map(|b| b.name.clone()).collect()
}

/// Map declared property blocks to name -> value
///
/// Declaring the same name twice is a conflict, even with equal values.
pub fn parse_property_blocks(blocks: &[PropertyBlock]) -> Result<DeclaredProperties> {
    let mut declared = DeclaredProperties::new();

    for block in blocks {
        if declared
            .insert(block.name.clone(), block.value.clone())
            .is_some()
        {
            return Err(Error::PropertyConflict {
                name: block.name.clone(),
            });
        }
    }

    Ok(declared)
}

/// Properties to fetch when describing a pool under `mode`
pub fn selection_for(declared: &DeclaredProperties, mode: PropertyMode) -> PropertySelection {
    match mode {
        PropertyMode::Defined => PropertySelection::Named(declared.keys().cloned().collect()),
        PropertyMode::All => PropertySelection::All,
    }
}

// =============================================================================
// Update Diff
// =============================================================================

/// Operations needed to move from one declaration to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyDiff {
    /// New or changed properties with their desired value
    pub to_set: BTreeMap<String, String>,
    /// Properties no longer declared
    pub to_reset: BTreeSet<String>,
    /// Properties declared with the same value on both sides
    pub unchanged: BTreeSet<String>,
}

impl PropertyDiff {
    /// Compare the previous and the new declaration
    ///
    /// Properties absent from both sides never appear in the result.
    pub fn compute(old: &DeclaredProperties, new: &DeclaredProperties) -> Self {
        let mut diff = PropertyDiff::default();

        for (name, value) in new {
            match old.get(name) {
                Some(previous) if previous == value => {
                    diff.unchanged.insert(name.clone());
                }
                _ => {
                    diff.to_set.insert(name.clone(), value.clone());
                }
            }
        }

        diff.to_reset = old
            .keys()
            .filter(|name| !new.contains_key(*name))
            .cloned()
            .collect();

        diff
    }

    /// True when no operation is required
    pub fn is_empty(&self) -> bool {
        self.to_set.is_empty() && self.to_reset.is_empty()
    }
}

// =============================================================================
// Display State
// =============================================================================

/// Outward-facing shape of an observed pool
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDisplay {
    /// Resource identity (the pool GUID)
    pub id: String,
    /// Property name -> display value
    pub properties: BTreeMap<String, String>,
    /// Property name -> raw value
    pub raw_properties: BTreeMap<String, String>,
    pub device: Vec<DeviceBlock>,
    pub mirror: Vec<MirrorBlock>,
}

/// Project an observed pool into display state
///
/// Every observed property is included, declared or not.
pub fn populate_display_state(pool: &Pool) -> PoolDisplay {
    let mut display = PoolDisplay {
        id: pool.guid.clone(),
        device: pool.layout.striped.iter().map(flatten_device).collect(),
        mirror: pool.layout.mirrors.iter().map(flatten_mirror).collect(),
        ..Default::default()
    };

    for (name, property) in &pool.properties {
        display.properties.insert(name.clone(), property.value.clone());
        display
            .raw_properties
            .insert(name.clone(), property.raw_value.clone());
    }

    display
}

/// Last-known values of the declared properties
///
/// A declared value is kept when the pool reports it in either form. Any
/// other observation is recorded raw so the next diff converges it. Names the
/// pool does not report are left out.
pub fn tracked_values(declared: &DeclaredProperties, pool: &Pool) -> DeclaredProperties {
    declared
        .iter()
        .filter_map(|(name, value)| {
            let observed = pool.property(name)?;
            let recorded = if observed.matches(value) {
                value.clone()
            } else {
                observed.raw_value.clone()
            };
            Some((name.clone(), recorded))
        })
        .collect()
}

// =============================================================================
// Drift
// =============================================================================

/// A property whose observed state differs from what is owned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDrift {
    pub name: String,
    /// Declared value, absent for undeclared properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared: Option<String>,
    /// Observed raw value, absent when the pool does not report it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PropertySource>,
}

/// Compare declared properties with an observed pool
///
/// In `All` mode every locally set property that is not declared is drift
/// too. Drift is only reported; nothing here changes the pool.
pub fn detect_drift(
    declared: &DeclaredProperties,
    pool: &Pool,
    mode: PropertyMode,
) -> Vec<PropertyDrift> {
    let mut drift: Vec<PropertyDrift> = declared
        .iter()
        .filter_map(|(name, value)| match pool.property(name) {
            Some(observed) if observed.matches(value) => None,
            Some(observed) => Some(PropertyDrift {
                name: name.clone(),
                declared: Some(value.clone()),
                observed: Some(observed.raw_value.clone()),
                source: Some(observed.source),
            }),
            None => Some(PropertyDrift {
                name: name.clone(),
                declared: Some(value.clone()),
                observed: None,
                source: None,
            }),
        })
        .collect();

    if mode == PropertyMode::All {
        drift.extend(
            pool.properties
                .iter()
                .filter(|(name, property)| {
                    property.source == PropertySource::Local
                        && !declared.contains_key(*name)
                        && !catalog::is_feature(name)
                        && !catalog::is_read_only(name)
                })
                .map(|(name, property)| PropertyDrift {
                    name: name.clone(),
                    declared: None,
                    observed: Some(property.raw_value.clone()),
                    source: Some(property.source),
                }),
        );
    }

    drift
}
