//! In-Memory Pool Backend
//!
//! A fake storage subsystem that keeps pools in a map. It follows the same
//! contracts as the `zpool` adapter (missing pools, name collisions,
//! read-only properties) and lets tests inject failures or mutate pools
//! behind the controller's back.

use crate::domain::pool::{Pool, PoolLayout, Property, PropertySource};
use crate::domain::ports::{CreationSpec, PoolCommands, PropertySelection};
use crate::error::{Error, Result};
use crate::properties::catalog;
use crate::topology::decode_vdev_spec;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Nominal capacity of every fake device
const DEVICE_BYTES: u64 = 1 << 40;

const FIRST_GUID: u64 = 1_000_000_007;

// =============================================================================
// Pool State
// =============================================================================

#[derive(Debug, Clone)]
struct StoredPool {
    name: String,
    layout: PoolLayout,
    /// Locally set properties
    local: BTreeMap<String, String>,
}

impl StoredPool {
    fn size_bytes(&self) -> u64 {
        // A mirror only contributes one member's capacity
        (self.layout.striped.len() + self.layout.mirrors.len()) as u64 * DEVICE_BYTES
    }

    fn properties(&self, guid: &str, selection: &PropertySelection) -> BTreeMap<String, Property> {
        let mut all = BTreeMap::new();

        let size = self.size_bytes();
        all.insert(
            "size".to_string(),
            Property::new(format!("{}T", size / DEVICE_BYTES), size.to_string(), PropertySource::Default),
        );
        all.insert("health".to_string(), Property::plain("ONLINE", PropertySource::Default));
        all.insert("guid".to_string(), Property::plain(guid, PropertySource::Default));

        for (name, value) in catalog::known_defaults() {
            let shown = if value.is_empty() { "-" } else { value };
            all.insert(name.to_string(), Property::plain(shown, PropertySource::Default));
        }

        for (name, value) in &self.local {
            all.insert(name.clone(), Property::plain(value.clone(), PropertySource::Local));
        }

        all.into_iter()
            .filter(|(name, _)| selection.includes(name))
            .collect()
    }
}

/// Failures to inject into subsequent calls
#[derive(Debug, Clone, Default)]
pub struct FailurePlan {
    /// Property names whose set or reset fails
    pub rejected_properties: BTreeSet<String>,
    pub rename: bool,
    pub create: bool,
    pub destroy: bool,
}

// =============================================================================
// In-Memory Backend
// =============================================================================

/// Storage subsystem fake keyed by pool GUID
pub struct InMemoryPools {
    pools: RwLock<BTreeMap<String, StoredPool>>,
    failures: RwLock<FailurePlan>,
    /// Mutating commands in the order they were issued
    journal: RwLock<Vec<String>>,
    next_guid: AtomicU64,
}

impl Default for InMemoryPools {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPools {
    pub fn new() -> Self {
        Self {
            pools: RwLock::new(BTreeMap::new()),
            failures: RwLock::new(FailurePlan::default()),
            journal: RwLock::new(Vec::new()),
            next_guid: AtomicU64::new(FIRST_GUID),
        }
    }

    fn allocate_guid(&self) -> String {
        self.next_guid.fetch_add(1, Ordering::Relaxed).to_string()
    }

    async fn record(&self, entry: String) {
        debug!("memory backend: {}", entry);
        self.journal.write().await.push(entry);
    }

    /// Replace the failure plan
    pub async fn set_failures(&self, plan: FailurePlan) {
        *self.failures.write().await = plan;
    }

    /// Mutating commands issued so far, e.g. `set tank autotrim=on`
    pub async fn journal(&self) -> Vec<String> {
        self.journal.read().await.clone()
    }

    /// Current pool names
    pub async fn pool_names(&self) -> Vec<String> {
        self.pools.read().await.values().map(|p| p.name.clone()).collect()
    }

    /// Add a pool that exists before any controller call, returning its GUID
    pub async fn insert_existing(
        &self,
        name: &str,
        layout: PoolLayout,
        local: BTreeMap<String, String>,
    ) -> String {
        let guid = self.allocate_guid();
        self.pools.write().await.insert(
            guid.clone(),
            StoredPool {
                name: name.to_string(),
                layout,
                local,
            },
        );
        guid
    }

    /// Destroy a pool without going through the port
    pub async fn remove_out_of_band(&self, name: &str) -> bool {
        let mut pools = self.pools.write().await;
        let before = pools.len();
        pools.retain(|_, p| p.name != name);
        pools.len() != before
    }

    /// Rename a pool without going through the port
    pub async fn rename_out_of_band(&self, old_name: &str, new_name: &str) -> bool {
        let mut pools = self.pools.write().await;
        match pools.values_mut().find(|p| p.name == old_name) {
            Some(pool) => {
                pool.name = new_name.to_string();
                true
            }
            None => false,
        }
    }

    /// Set a property without going through the port
    pub async fn set_out_of_band(&self, name: &str, property: &str, value: &str) -> bool {
        let mut pools = self.pools.write().await;
        match pools.values_mut().find(|p| p.name == name) {
            Some(pool) => {
                pool.local.insert(property.to_string(), value.to_string());
                true
            }
            None => false,
        }
    }

    fn command_error(command: String, stderr: String) -> Error {
        Error::CommandFailed {
            command,
            status: Some(1),
            stderr,
        }
    }
}

fn not_found(pool: &str) -> Error {
    Error::PoolNotFound {
        pool: pool.to_string(),
    }
}

#[async_trait]
impl PoolCommands for InMemoryPools {
    async fn describe(&self, pool_name: &str, selection: &PropertySelection) -> Result<Pool> {
        let pools = self.pools.read().await;
        let (guid, stored) = pools
            .iter()
            .find(|(_, p)| p.name == pool_name)
            .ok_or_else(|| not_found(pool_name))?;

        Ok(Pool {
            guid: guid.clone(),
            name: stored.name.clone(),
            layout: stored.layout.clone(),
            properties: stored.properties(guid, selection),
        })
    }

    async fn create(&self, spec: &CreationSpec) -> Result<Pool> {
        let command = format!("create {} {}", spec.name, spec.vdev_spec);

        if self.failures.read().await.create {
            return Err(Self::command_error(command, "injected create failure".into()));
        }

        let layout = decode_vdev_spec(&spec.vdev_spec)?;
        if layout.is_empty() {
            return Err(Self::command_error(command, "missing vdev specification".into()));
        }

        if let Some(name) = spec.properties.keys().find(|n| catalog::is_read_only(n)) {
            return Err(Self::command_error(
                command,
                format!("property '{}' is readonly", name),
            ));
        }

        {
            let mut pools = self.pools.write().await;

            if pools.values().any(|p| p.name == spec.name) {
                return Err(Self::command_error(
                    command,
                    format!("cannot create '{}': pool already exists", spec.name),
                ));
            }

            let in_use: BTreeSet<&str> = pools.values().flat_map(|p| p.layout.device_paths()).collect();
            if let Some(path) = layout.device_paths().find(|p| in_use.contains(p)) {
                if !spec.force {
                    return Err(Self::command_error(
                        command,
                        format!("{} is part of an active pool", path),
                    ));
                }
            }

            let guid = self.allocate_guid();
            info!("memory backend: created pool {} ({})", spec.name, guid);
            pools.insert(
                guid,
                StoredPool {
                    name: spec.name.clone(),
                    layout,
                    local: spec.properties.clone(),
                },
            );
        }

        self.record(command).await;

        let declared: BTreeSet<String> = spec.properties.keys().cloned().collect();
        self.describe(&spec.name, &PropertySelection::Named(declared))
            .await
    }

    async fn destroy(&self, pool_name: &str) -> Result<()> {
        if self.failures.read().await.destroy {
            return Err(Self::command_error(
                format!("destroy {}", pool_name),
                "pool is busy".into(),
            ));
        }

        if !self.remove_out_of_band(pool_name).await {
            return Err(not_found(pool_name));
        }
        self.record(format!("destroy {}", pool_name)).await;
        Ok(())
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<()> {
        let command = format!("rename {} {}", old_name, new_name);

        if self.failures.read().await.rename {
            return Err(Self::command_error(command, "injected rename failure".into()));
        }

        {
            let mut pools = self.pools.write().await;
            if pools.values().any(|p| p.name == new_name) {
                return Err(Self::command_error(
                    command,
                    format!("a pool with name '{}' already exists", new_name),
                ));
            }
            let pool = pools
                .values_mut()
                .find(|p| p.name == old_name)
                .ok_or_else(|| not_found(old_name))?;
            pool.name = new_name.to_string();
        }

        self.record(command).await;
        Ok(())
    }

    async fn resolve_name_by_guid(&self, guid: &str) -> Result<String> {
        self.pools
            .read()
            .await
            .get(guid)
            .map(|p| p.name.clone())
            .ok_or_else(|| not_found(guid))
    }

    async fn set_property(&self, pool_name: &str, property: &str, value: &str) -> Result<()> {
        let command = format!("set {} {}={}", pool_name, property, value);

        if catalog::is_read_only(property) {
            return Err(Self::command_error(
                command,
                format!("property '{}' is readonly", property),
            ));
        }
        if self.failures.read().await.rejected_properties.contains(property) {
            return Err(Self::command_error(command, "injected property failure".into()));
        }

        {
            let mut pools = self.pools.write().await;
            let pool = pools
                .values_mut()
                .find(|p| p.name == pool_name)
                .ok_or_else(|| not_found(pool_name))?;
            pool.local.insert(property.to_string(), value.to_string());
        }

        self.record(command).await;
        Ok(())
    }

    async fn reset_property(&self, pool_name: &str, property: &str) -> Result<()> {
        let command = format!("reset {} {}", pool_name, property);

        if self.failures.read().await.rejected_properties.contains(property) {
            return Err(Self::command_error(command, "injected property failure".into()));
        }

        {
            let mut pools = self.pools.write().await;
            let pool = pools
                .values_mut()
                .find(|p| p.name == pool_name)
                .ok_or_else(|| not_found(pool_name))?;
            pool.local.remove(property);
        }

        self.record(command).await;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
