//! Pool domain types
//!
//! Strongly-typed model of a storage pool as observed from the storage
//! subsystem: its topology, its properties and their provenance.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

// =============================================================================
// Topology
// =============================================================================

/// A single leaf storage unit, identified by its path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Device {
    pub path: String,
}

impl Device {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A redundant top-level group of two or more devices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mirror {
    pub devices: Vec<Device>,
}

impl Mirror {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }
}

/// Pool topology: standalone (striped) devices plus mirror groups
///
/// Immutable once the pool exists. Any change to it means recreating the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolLayout {
    pub striped: Vec<Device>,
    pub mirrors: Vec<Mirror>,
}

impl PoolLayout {
    pub fn new(striped: Vec<Device>, mirrors: Vec<Mirror>) -> Self {
        Self { striped, mirrors }
    }

    /// True when the layout has neither devices nor mirrors
    pub fn is_empty(&self) -> bool {
        self.striped.is_empty() && self.mirrors.is_empty()
    }

    /// Number of top-level vdevs
    pub fn vdev_count(&self) -> usize {
        self.striped.len() + self.mirrors.len()
    }

    /// Every device path in the layout, striped devices first
    pub fn device_paths(&self) -> impl Iterator<Item = &str> {
        self.striped
            .iter()
            .chain(self.mirrors.iter().flat_map(|m| m.devices.iter()))
            .map(|d| d.path.as_str())
    }

    /// Check the layout can be handed to the create command
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(Error::Topology(
                "layout must contain at least one device or mirror".into(),
            ));
        }

        for (index, mirror) in self.mirrors.iter().enumerate() {
            if mirror.devices.len() < 2 {
                return Err(Error::Topology(format!(
                    "mirror {} must contain at least two devices, found {}",
                    index,
                    mirror.devices.len()
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for path in self.device_paths() {
            if path.is_empty() {
                return Err(Error::Topology("device path must not be empty".into()));
            }
            if path.chars().any(char::is_whitespace) {
                return Err(Error::Topology(format!(
                    "device path '{}' must not contain whitespace",
                    path
                )));
            }
            if !seen.insert(path) {
                return Err(Error::Topology(format!(
                    "device '{}' is used more than once",
                    path
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Properties
// =============================================================================

/// Where an observed property value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PropertySource {
    /// Explicitly set on this pool
    Local,
    /// Subsystem default, never set
    Default,
    /// Derived from a parent or system-wide setting
    Inherited,
    /// Session-scoped override, not persisted
    Temporary,
}

impl std::fmt::Display for PropertySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertySource::Local => write!(f, "local"),
            PropertySource::Default => write!(f, "default"),
            PropertySource::Inherited => write!(f, "inherited"),
            PropertySource::Temporary => write!(f, "temporary"),
        }
    }
}

impl FromStr for PropertySource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "local" => Ok(PropertySource::Local),
            // Read-only and computed values report no source at all
            "default" | "-" | "none" => Ok(PropertySource::Default),
            "temporary" => Ok(PropertySource::Temporary),
            other if other.starts_with("inherited") => Ok(PropertySource::Inherited),
            other => Err(Error::Parse(format!(
                "unrecognized property source '{}'",
                other
            ))),
        }
    }
}

/// How `zpool get` shows a property with no value
const UNSET_VALUE: &str = "-";

fn is_keyword(value: &str) -> bool {
    matches!(value, "on" | "off" | "enabled" | "disabled" | "active")
}

/// An observed property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Human-oriented value, e.g. `1T`
    pub value: String,
    /// Canonical machine value, e.g. `1099511627776`
    pub raw_value: String,
    pub source: PropertySource,
}

impl Property {
    pub fn new(value: impl Into<String>, raw_value: impl Into<String>, source: PropertySource) -> Self {
        Self {
            value: value.into(),
            raw_value: raw_value.into(),
            source,
        }
    }

    /// Property whose display and raw forms are the same
    pub fn plain(value: impl Into<String>, source: PropertySource) -> Self {
        let value = value.into();
        Self {
            raw_value: value.clone(),
            value,
            source,
        }
    }

    /// True when `declared` matches either the display or the raw form
    ///
    /// An empty value is reported as `-`, and keyword values such as
    /// `on`/`off` are accepted in any case.
    pub fn matches(&self, declared: &str) -> bool {
        let declared = if declared.is_empty() { UNSET_VALUE } else { declared };
        [&self.value, &self.raw_value].into_iter().any(|observed| {
            let observed = if observed.is_empty() {
                UNSET_VALUE
            } else {
                observed.as_str()
            };
            observed == declared
                || (is_keyword(observed) && observed.eq_ignore_ascii_case(declared))
        })
    }
}

/// Which properties are owned and kept convergent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum PropertyMode {
    /// Only explicitly declared properties are tracked
    #[default]
    Defined,
    /// Every discovered property is checked for drift
    All,
}

impl std::fmt::Display for PropertyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyMode::Defined => write!(f, "defined"),
            PropertyMode::All => write!(f, "all"),
        }
    }
}

impl FromStr for PropertyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "defined" => Ok(PropertyMode::Defined),
            "all" => Ok(PropertyMode::All),
            other => Err(Error::Configuration(format!(
                "unknown property_mode '{}', expected 'defined' or 'all'",
                other
            ))),
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// A pool as reported by the storage subsystem
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
    /// Globally unique identifier, stable across renames
    pub guid: String,
    pub name: String,
    pub layout: PoolLayout,
    pub properties: BTreeMap<String, Property>,
}

impl Pool {
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }
}

// =============================================================================
// Pool Names
// =============================================================================

const RESERVED_POOL_NAMES: &[&str] = &["mirror", "spare", "log", "cache", "special", "dedup"];
const RESERVED_POOL_PREFIXES: &[&str] = &["raidz", "draid"];

/// Check a pool name against the subsystem's naming rules
pub fn validate_pool_name(name: &str) -> Result<()> {
    let first = name
        .chars()
        .next()
        .ok_or_else(|| Error::Configuration("pool name must not be empty".into()))?;

    if !first.is_ascii_alphabetic() {
        return Err(Error::Configuration(format!(
            "pool name '{}' must begin with a letter",
            name
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
    {
        return Err(Error::Configuration(format!(
            "pool name '{}' contains invalid character '{}'",
            name, bad
        )));
    }

    if RESERVED_POOL_NAMES.contains(&name)
        || RESERVED_POOL_PREFIXES.iter().any(|p| name.starts_with(p))
    {
        return Err(Error::Configuration(format!(
            "pool name '{}' is reserved",
            name
        )));
    }

    Ok(())
}
