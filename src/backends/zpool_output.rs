//! Parsers for `zpool` command output
//!
//! All parsers expect scripted output (`-H`, tab separated) except the
//! layout parser, which reads the `config:` section of `zpool status -P`.

use crate::domain::pool::{Device, Mirror, PoolLayout, Property, PropertySource};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Column width of a tab in `zpool status` output
const TAB_WIDTH: usize = 8;

/// One row of `zpool get -H -o property,value,source`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyRow {
    pub name: String,
    pub value: String,
    pub source: PropertySource,
}

/// Parse `zpool get -H[p] -o property,value,source` output
pub fn parse_property_rows(output: &str) -> Result<Vec<PropertyRow>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            match fields.as_slice() {
                [name, value, source] => Ok(PropertyRow {
                    name: name.to_string(),
                    value: value.to_string(),
                    source: source.parse()?,
                }),
                _ => Err(Error::Parse(format!(
                    "expected 3 fields in property line '{}'",
                    line
                ))),
            }
        })
        .collect()
}

/// Join display rows (`-H`) with raw rows (`-Hp`) by property name
///
/// A property missing from the raw output falls back to its display value.
pub fn merge_property_rows(
    display: Vec<PropertyRow>,
    raw: Vec<PropertyRow>,
) -> BTreeMap<String, Property> {
    let mut raw_values: BTreeMap<String, String> =
        raw.into_iter().map(|row| (row.name, row.value)).collect();

    display
        .into_iter()
        .map(|row| {
            let raw_value = raw_values.remove(&row.name).unwrap_or_else(|| row.value.clone());
            (
                row.name,
                Property {
                    value: row.value,
                    raw_value,
                    source: row.source,
                },
            )
        })
        .collect()
}

/// Parse `zpool list -Hp -o name,guid` into (name, guid) pairs
pub fn parse_pool_list(output: &str) -> Result<Vec<(String, String)>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split('\t').collect::<Vec<_>>().as_slice() {
            [name, guid] => Ok((name.to_string(), guid.trim().to_string())),
            _ => Err(Error::Parse(format!(
                "expected name and guid in list line '{}'",
                line
            ))),
        })
        .collect()
}

/// Parse `zpool get -Hp -o value guid` output
pub fn parse_guid(output: &str) -> Result<String> {
    let guid = output.trim();
    if guid.is_empty() || !guid.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Parse(format!("invalid pool guid '{}'", guid)));
    }
    Ok(guid.to_string())
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
        .sum()
}

/// Kind of the top-level vdev currently being read
enum TopVdev {
    Device,
    Mirror,
    /// `replacing-N` / `spare-N`; its first member is the configured device
    Interim { taken: bool },
}

fn is_interim(name: &str) -> bool {
    name.starts_with("replacing-") || name.starts_with("spare-")
}

/// Parse the top-level layout from `zpool status -P <pool>`
///
/// Only data vdevs are modeled; `logs`, `cache`, `spares`, `special` and
/// `dedup` sections are skipped. Other grouped vdevs (raidz, draid) are
/// rejected since the layout cannot represent them. While a device is being
/// replaced or spared, the original device stands for its slot.
pub fn parse_status_layout(output: &str) -> Result<PoolLayout> {
    let mut lines = output
        .lines()
        .skip_while(|line| line.trim() != "config:")
        .skip(1)
        .skip_while(|line| line.trim().is_empty());

    match lines.next() {
        Some(header) if header.trim_start().starts_with("NAME") => {}
        _ => return Err(Error::Parse("missing config section in zpool status output".into())),
    }

    let root = lines
        .next()
        .ok_or_else(|| Error::Parse("missing pool line in zpool status output".into()))?;
    let root_indent = indent_width(root);

    let mut layout = PoolLayout::default();
    let mut top = TopVdev::Device;
    // Some(taken) while inside an interim vdev of a mirror
    let mut member_interim: Option<bool> = None;
    let mut in_data_section = true;

    for line in lines {
        if line.trim().is_empty() {
            break;
        }

        let indent = indent_width(line);
        let name = line.split_whitespace().next().unwrap_or_default();

        if indent <= root_indent {
            // logs / cache / spares / special / dedup
            in_data_section = false;
            continue;
        }
        if !in_data_section {
            continue;
        }

        if indent == root_indent + 2 {
            member_interim = None;
            top = if name.starts_with("mirror") {
                layout.mirrors.push(Mirror::new(Vec::new()));
                TopVdev::Mirror
            } else if name.starts_with("raidz") || name.starts_with("draid") {
                return Err(Error::Parse(format!("unsupported vdev type '{}'", name)));
            } else if is_interim(name) {
                TopVdev::Interim { taken: false }
            } else {
                layout.striped.push(Device::new(name));
                TopVdev::Device
            };
        } else if indent == root_indent + 4 {
            match &mut top {
                TopVdev::Interim { taken } => {
                    if !*taken {
                        layout.striped.push(Device::new(name));
                        *taken = true;
                    }
                }
                TopVdev::Mirror if is_interim(name) => member_interim = Some(false),
                TopVdev::Mirror => {
                    member_interim = None;
                    if let Some(mirror) = layout.mirrors.last_mut() {
                        mirror.devices.push(Device::new(name));
                    }
                }
                TopVdev::Device => {
                    return Err(Error::Parse(format!(
                        "device '{}' is nested under a non-mirror vdev",
                        name
                    )))
                }
            }
        } else if indent == root_indent + 6 && member_interim == Some(false) {
            if let Some(mirror) = layout.mirrors.last_mut() {
                mirror.devices.push(Device::new(name));
            }
            member_interim = Some(true);
        }
    }

    Ok(layout)
}
