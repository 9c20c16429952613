//! Pool Declaration
//!
//! The user-facing description of a pool, read from YAML (or JSON), and its
//! conversion into the strongly-typed desired state the controller consumes.

use crate::domain::pool::{PoolLayout, PropertyMode};
use crate::error::Result;
use crate::properties::{
    declared_property_names, parse_property_blocks, DeclaredProperties, PropertyBlock,
};
use crate::topology::{DeviceBlock, MirrorBlock};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

// =============================================================================
// Declaration
// =============================================================================

/// Declared configuration of one pool
///
/// `device` and `mirror` are fixed once the pool exists; changing them
/// replaces the pool. `property` and `property_mode` can change in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PoolDeclaration {
    /// Pool name
    pub name: String,

    /// Standalone (striped) devices
    #[serde(default)]
    pub device: Vec<DeviceBlock>,

    /// Mirror groups
    #[serde(default)]
    pub mirror: Vec<MirrorBlock>,

    /// Pool properties to own
    #[serde(default)]
    pub property: Vec<PropertyBlock>,

    /// Which properties are checked for drift
    #[serde(default)]
    pub property_mode: PropertyMode,
}

/// Validated desired state derived from a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPool {
    pub name: String,
    pub layout: PoolLayout,
    pub properties: DeclaredProperties,
    pub mode: PropertyMode,
}

impl PoolDeclaration {
    /// Parse a declaration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read a declaration file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&text)
    }

    /// Names of the declared properties
    pub fn property_names(&self) -> BTreeSet<String> {
        declared_property_names(&self.property)
    }

    pub fn layout(&self) -> PoolLayout {
        PoolLayout::from_blocks(&self.device, &self.mirror)
    }

    /// Resolve the declaration into desired state
    ///
    /// Fails on duplicate property names. Topology and name checks happen
    /// when the pool is created.
    pub fn desired(&self) -> Result<DesiredPool> {
        Ok(DesiredPool {
            name: self.name.clone(),
            layout: self.layout(),
            properties: parse_property_blocks(&self.property)?,
            mode: self.property_mode,
        })
    }

    /// JSON schema of the declaration format
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(PoolDeclaration);
        Ok(serde_json::to_string_pretty(&schema)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;

    const DECLARATION: &str = r#"
name: tank
device:
  - path: /dev/sda
mirror:
  - device:
      - path: /dev/sdb
      - path: /dev/sdc
property:
  - name: autotrim
    value: "on"
  - name: failmode
    value: continue
"#;

    #[test]
    fn test_parse_declaration() {
        let declaration = PoolDeclaration::from_yaml(DECLARATION).unwrap();

        assert_eq!(declaration.name, "tank");
        assert_eq!(declaration.property_mode, PropertyMode::Defined);
        assert_eq!(declaration.layout().to_vdev_spec(), "/dev/sda mirror /dev/sdb /dev/sdc");

        let desired = declaration.desired().unwrap();
        assert_eq!(desired.properties["autotrim"], "on");
        assert_eq!(desired.properties["failmode"], "continue");
    }

    #[test]
    fn test_property_mode_all() {
        let declaration =
            PoolDeclaration::from_yaml("name: tank\ndevice: [{path: /dev/sda}]\nproperty_mode: all\n")
                .unwrap();
        assert_eq!(declaration.property_mode, PropertyMode::All);
    }

    #[test]
    fn test_rejects_unknown_mode() {
        assert_matches!(
            PoolDeclaration::from_yaml("name: tank\nproperty_mode: strict\n"),
            Err(Error::Yaml(_))
        );
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(PoolDeclaration::from_yaml("name: tank\nraidz: []\n").is_err());
    }

    #[test]
    fn test_duplicate_property_is_conflict() {
        let declaration = PoolDeclaration::from_yaml(
            "name: tank\nproperty:\n  - {name: autotrim, value: \"on\"}\n  - {name: autotrim, value: \"off\"}\n",
        )
        .unwrap();

        assert_matches!(declaration.desired(), Err(Error::PropertyConflict { .. }));
    }

    #[test]
    fn test_json_schema_names_fields() {
        let schema = PoolDeclaration::json_schema().unwrap();
        for field in ["name", "device", "mirror", "property", "property_mode"] {
            assert!(schema.contains(field));
        }
    }
}
