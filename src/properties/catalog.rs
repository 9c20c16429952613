//! Pool Property Catalog
//!
//! Static knowledge about pool properties: which ones are read-only and
//! which default value restores a settable property. `zpool` has no
//! `inherit` command, so a reset is a `set` back to the default.

/// Properties computed by the subsystem that can never be set
const READ_ONLY: &[&str] = &[
    "allocated",
    "bcloneratio",
    "bclonesaved",
    "bcloneused",
    "capacity",
    "checkpoint",
    "dedupratio",
    "expandsize",
    "fragmentation",
    "free",
    "freeing",
    "guid",
    "health",
    "leaked",
    "load_guid",
    "name",
    "size",
];

/// Settable properties and the values `zpool create` gives them
const DEFAULTS: &[(&str, &str)] = &[
    ("autoexpand", "off"),
    ("autoreplace", "off"),
    ("autotrim", "off"),
    ("bootfs", ""),
    ("cachefile", ""),
    ("comment", ""),
    ("delegation", "on"),
    ("failmode", "wait"),
    ("listsnapshots", "off"),
    ("multihost", "off"),
];

/// True for properties the subsystem computes itself
pub fn is_read_only(property: &str) -> bool {
    READ_ONLY.contains(&property)
}

/// Default value of a settable property, if known
pub fn default_value(property: &str) -> Option<&'static str> {
    DEFAULTS
        .iter()
        .find(|(name, _)| *name == property)
        .map(|(_, value)| *value)
}

/// True for `feature@` flags, which report `local` once enabled
pub fn is_feature(property: &str) -> bool {
    property.starts_with("feature@")
}

/// True when a reset can be expressed as a `set` to a known default
///
/// `feature@` flags can be enabled but never disabled again.
pub fn is_resettable(property: &str) -> bool {
    !is_read_only(property) && !is_feature(property) && default_value(property).is_some()
}

/// Every settable property with a known default
pub fn known_defaults() -> impl Iterator<Item = (&'static str, &'static str)> {
    DEFAULTS.iter().copied()
}
