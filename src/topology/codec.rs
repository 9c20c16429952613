//! Vdev Specification Codec
//!
//! Converts between the structured pool layout and the flat vdev
//! specification accepted by `zpool create`, and projects devices and
//! mirrors into the records exposed to the declarative host.

use crate::domain::pool::{Device, Mirror, PoolLayout};
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Keyword introducing a mirror group in the vdev specification
pub const MIRROR_TOKEN: &str = "mirror";

/// Vdev keywords this codec does not model
const UNSUPPORTED_TOKENS: &[&str] = &[
    "raidz", "raidz1", "raidz2", "raidz3", "spare", "log", "cache", "special", "dedup",
];

// =============================================================================
// Display Records
// =============================================================================

/// A device as seen by the declarative host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct DeviceBlock {
    /// Device path, e.g. /dev/sda or /dev/disk/by-id/...
    pub path: String,
}

/// A mirror as seen by the declarative host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct MirrorBlock {
    /// Member devices, at least two
    #[schemars(length(min = 2))]
    pub device: Vec<DeviceBlock>,
}

// =============================================================================
// Encode
// =============================================================================

/// Build the vdev specification for `devices` followed by `mirrors`
///
/// Standalone devices come first in input order, then each mirror as the
/// `mirror` keyword followed by its member paths. Two empty inputs give an
/// empty string.
pub fn encode_vdev_spec(devices: &[Device], mirrors: &[Mirror]) -> String {
    let mut tokens: Vec<&str> = Vec::with_capacity(
        devices.len() + mirrors.iter().map(|m| m.devices.len() + 1).sum::<usize>(),
    );

    tokens.extend(devices.iter().map(|d| d.path.as_str()));

    for mirror in mirrors {
        tokens.push(MIRROR_TOKEN);
        tokens.extend(mirror.devices.iter().map(|d| d.path.as_str()));
    }

    tokens.join(" ")
}

impl PoolLayout {
    /// Encode this layout as a vdev specification
    pub fn to_vdev_spec(&self) -> String {
        encode_vdev_spec(&self.striped, &self.mirrors)
    }

    /// Build a layout from host records
    pub fn from_blocks(devices: &[DeviceBlock], mirrors: &[MirrorBlock]) -> Self {
        PoolLayout {
            striped: devices.iter().map(|d| Device::new(d.path.clone())).collect(),
            mirrors: mirrors
                .iter()
                .map(|m| Mirror::new(m.device.iter().map(|d| Device::new(d.path.clone())).collect()))
                .collect(),
        }
    }

    /// Project this layout into host records
    pub fn to_blocks(&self) -> (Vec<DeviceBlock>, Vec<MirrorBlock>) {
        (
            self.striped.iter().map(flatten_device).collect(),
            self.mirrors.iter().map(flatten_mirror).collect(),
        )
    }
}

/// Parse a vdev specification produced by [`encode_vdev_spec`]
///
/// Devices before the first `mirror` keyword are striped; every later device
/// belongs to the most recent mirror.
pub fn decode_vdev_spec(spec: &str) -> Result<PoolLayout> {
    let mut layout = PoolLayout::default();

    for token in spec.split_whitespace() {
        if token == MIRROR_TOKEN {
            layout.mirrors.push(Mirror::new(Vec::new()));
        } else if UNSUPPORTED_TOKENS.contains(&token) || token.starts_with("draid") {
            return Err(Error::Topology(format!(
                "unsupported vdev keyword '{}'",
                token
            )));
        } else if let Some(mirror) = layout.mirrors.last_mut() {
            mirror.devices.push(Device::new(token));
        } else {
            layout.striped.push(Device::new(token));
        }
    }

    Ok(layout)
}

// =============================================================================
// Flatten
// =============================================================================

pub fn flatten_device(device: &Device) -> DeviceBlock {
    DeviceBlock {
        path: device.path.clone(),
    }
}

pub fn flatten_mirror(mirror: &Mirror) -> MirrorBlock {
    MirrorBlock {
        device: mirror.devices.iter().map(flatten_device).collect(),
    }
}
