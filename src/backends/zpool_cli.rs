//! `zpool` Command-Line Backend
//!
//! Implements the pool command port by running the `zpool` binary.

use crate::backends::zpool_output::{
    merge_property_rows, parse_guid, parse_pool_list, parse_property_rows, parse_status_layout,
};
use crate::domain::pool::{Pool, Property};
use crate::domain::ports::{CreationSpec, PoolCommands, PropertySelection};
use crate::error::{Error, Result};
use crate::properties::catalog;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the `zpool` backend
#[derive(Debug, Clone)]
pub struct ZpoolCliConfig {
    /// Path to the zpool binary
    pub zpool_path: String,
    /// Program to run zpool through, e.g. `sudo` or `pfexec`
    pub privilege_wrapper: Option<String>,
}

impl Default for ZpoolCliConfig {
    fn default() -> Self {
        Self {
            zpool_path: "zpool".to_string(),
            privilege_wrapper: None,
        }
    }
}

// =============================================================================
// Argument Builders
// =============================================================================

fn create_args(spec: &CreationSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if spec.force {
        args.push("-f".to_string());
    }
    for (name, value) in &spec.properties {
        args.push("-o".to_string());
        args.push(format!("{}={}", name, value));
    }
    args.push(spec.name.clone());
    args.extend(spec.vdev_spec.split_whitespace().map(str::to_string));
    args
}

/// Export, import-as-new-name and restore commands of a rename
fn rename_args(old_name: &str, guid: &str, new_name: &str) -> (Vec<String>, Vec<String>, Vec<String>) {
    (
        vec!["export".to_string(), old_name.to_string()],
        vec!["import".to_string(), guid.to_string(), new_name.to_string()],
        vec!["import".to_string(), guid.to_string()],
    )
}

fn property_list(selection: &PropertySelection) -> Option<String> {
    match selection {
        PropertySelection::All => Some("all".to_string()),
        PropertySelection::Named(names) if names.is_empty() => None,
        PropertySelection::Named(names) => {
            Some(names.iter().cloned().collect::<Vec<_>>().join(","))
        }
    }
}

fn is_missing_pool(stderr: &str) -> bool {
    stderr.contains("no such pool")
}

// =============================================================================
// zpool Backend
// =============================================================================

/// Pool commands backed by the `zpool` binary
pub struct ZpoolCli {
    config: ZpoolCliConfig,
}

impl ZpoolCli {
    pub fn new(config: ZpoolCliConfig) -> Self {
        Self { config }
    }

    /// Program and full argument list for a zpool invocation
    fn command_line(&self, args: &[String]) -> (String, Vec<String>) {
        match &self.config.privilege_wrapper {
            Some(wrapper) => {
                let mut full = vec![self.config.zpool_path.clone()];
                full.extend(args.iter().cloned());
                (wrapper.clone(), full)
            }
            None => (self.config.zpool_path.clone(), args.to_vec()),
        }
    }

    /// Run zpool and return stdout
    ///
    /// `pool` names the pool the command targets so a "no such pool" failure
    /// can be reported as [`Error::PoolNotFound`].
    async fn run(&self, pool: Option<&str>, args: Vec<String>) -> Result<String> {
        let (program, full_args) = self.command_line(&args);
        let rendered = format!("zpool {}", args.join(" "));
        debug!("Running: {} {}", program, full_args.join(" "));

        let output = Command::new(&program)
            .args(&full_args)
            .env("LC_ALL", "C")
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if let Some(pool) = pool {
            if is_missing_pool(&stderr) {
                return Err(Error::PoolNotFound {
                    pool: pool.to_string(),
                });
            }
        }

        Err(Error::CommandFailed {
            command: rendered,
            status: output.status.code(),
            stderr,
        })
    }

    async fn pool_guid(&self, pool_name: &str) -> Result<String> {
        let output = self
            .run(
                Some(pool_name),
                vec![
                    "get".into(),
                    "-Hp".into(),
                    "-o".into(),
                    "value".into(),
                    "guid".into(),
                    pool_name.into(),
                ],
            )
            .await?;
        parse_guid(&output)
    }

    async fn get_properties(
        &self,
        pool_name: &str,
        selection: &PropertySelection,
    ) -> Result<BTreeMap<String, Property>> {
        let list = match property_list(selection) {
            Some(list) => list,
            None => return Ok(BTreeMap::new()),
        };

        let display = self
            .run(
                Some(pool_name),
                vec![
                    "get".into(),
                    "-H".into(),
                    "-o".into(),
                    "property,value,source".into(),
                    list.clone(),
                    pool_name.into(),
                ],
            )
            .await?;
        let raw = self
            .run(
                Some(pool_name),
                vec![
                    "get".into(),
                    "-Hp".into(),
                    "-o".into(),
                    "property,value,source".into(),
                    list,
                    pool_name.into(),
                ],
            )
            .await?;

        Ok(merge_property_rows(
            parse_property_rows(&display)?,
            parse_property_rows(&raw)?,
        ))
    }
}

#[async_trait]
impl PoolCommands for ZpoolCli {
    async fn describe(&self, pool_name: &str, selection: &PropertySelection) -> Result<Pool> {
        let guid = self.pool_guid(pool_name).await?;

        let status = self
            .run(
                Some(pool_name),
                vec!["status".into(), "-P".into(), pool_name.into()],
            )
            .await?;
        let layout = parse_status_layout(&status)?;

        let properties = self.get_properties(pool_name, selection).await?;

        Ok(Pool {
            guid,
            name: pool_name.to_string(),
            layout,
            properties,
        })
    }

    async fn create(&self, spec: &CreationSpec) -> Result<Pool> {
        info!("Creating zpool {}: {}", spec.name, spec.vdev_spec);

        self.run(None, create_args(spec)).await?;

        let declared: BTreeSet<String> = spec.properties.keys().cloned().collect();
        self.describe(&spec.name, &PropertySelection::Named(declared))
            .await
    }

    async fn destroy(&self, pool_name: &str) -> Result<()> {
        info!("Destroying zpool {}", pool_name);
        self.run(Some(pool_name), vec!["destroy".into(), pool_name.into()])
            .await?;
        Ok(())
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        // zpool renames by exporting and importing under the new name. Imports
        // go by GUID so an unrelated exported pool with the same name cannot
        // make them ambiguous.
        info!("Renaming zpool {} -> {}", old_name, new_name);

        let guid = self.pool_guid(old_name).await?;
        let (export, import, restore) = rename_args(old_name, &guid, new_name);

        self.run(Some(old_name), export).await?;

        if let Err(err) = self.run(None, import).await {
            warn!(
                "Import of {} ({}) as {} failed, restoring original name: {}",
                old_name, guid, new_name, err
            );
            if let Err(restore) = self.run(None, restore).await {
                error!("Failed to re-import zpool {} ({}): {}", old_name, guid, restore);
            }
            return Err(err);
        }

        Ok(())
    }

    async fn resolve_name_by_guid(&self, guid: &str) -> Result<String> {
        let output = self
            .run(
                None,
                vec![
                    "list".into(),
                    "-Hp".into(),
                    "-o".into(),
                    "name,guid".into(),
                ],
            )
            .await?;

        parse_pool_list(&output)?
            .into_iter()
            .find(|(_, pool_guid)| pool_guid == guid)
            .map(|(name, _)| name)
            .ok_or_else(|| Error::PoolNotFound {
                pool: guid.to_string(),
            })
    }

    async fn set_property(&self, pool_name: &str, property: &str, value: &str) -> Result<()> {
        debug!("Setting {}={} on zpool {}", property, value, pool_name);
        self.run(
            Some(pool_name),
            vec![
                "set".into(),
                format!("{}={}", property, value),
                pool_name.into(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn reset_property(&self, pool_name: &str, property: &str) -> Result<()> {
        let default = catalog::default_value(property).ok_or_else(|| {
            Error::Configuration(format!(
                "no known default for pool property '{}'",
                property
            ))
        })?;
        self.set_property(pool_name, property, default).await
    }

    fn backend_name(&self) -> &str {
        "zpool"
    }
}
