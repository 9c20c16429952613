//! Pool Lifecycle Controller
//!
//! Turns create / read / update / delete / import requests into calls on the
//! pool command port. The controller keeps no state between calls: every
//! operation starts from the pool GUID and re-observes the subsystem.

use crate::domain::pool::{validate_pool_name, Pool, PoolLayout, PropertyMode};
use crate::domain::ports::{CreationSpec, PoolCommandsRef, PropertySelection};
use crate::error::{Error, MutationFailure, MutationOp, Result};
use crate::properties::{
    catalog, detect_drift, populate_display_state, selection_for, tracked_values,
    DeclaredProperties, PoolDisplay, PropertyDiff, PropertyDrift,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

// =============================================================================
// Requests
// =============================================================================

/// Request to create a pool
#[derive(Debug, Clone)]
pub struct CreatePoolRequest {
    pub name: String,
    pub layout: PoolLayout,
    pub properties: DeclaredProperties,
    pub mode: PropertyMode,
    /// Override in-use device checks
    pub force: bool,
}

/// Request to converge an existing pool
#[derive(Debug, Clone)]
pub struct UpdatePoolRequest {
    pub guid: String,
    /// Declared pool name
    pub name: String,
    /// Last known values of the previously declared properties
    pub old_properties: DeclaredProperties,
    /// Newly declared properties
    pub new_properties: DeclaredProperties,
    pub mode: PropertyMode,
}

// =============================================================================
// Pool State
// =============================================================================

/// Materialized state of a managed pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub guid: String,
    pub name: String,
    pub mode: PropertyMode,
    /// Last known values of the declared properties
    pub tracked: DeclaredProperties,
    pub display: PoolDisplay,
    pub drift: Vec<PropertyDrift>,
}

impl PoolState {
    fn observe(pool: &Pool, declared: &DeclaredProperties, mode: PropertyMode) -> Self {
        Self {
            guid: pool.guid.clone(),
            name: pool.name.clone(),
            mode,
            tracked: tracked_values(declared, pool),
            display: populate_display_state(pool),
            drift: detect_drift(declared, pool, mode),
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Lifecycle controller for a single pool resource at a time
pub struct PoolController {
    commands: PoolCommandsRef,
}

impl PoolController {
    /// Create a controller on top of a command backend
    pub fn new(commands: PoolCommandsRef) -> Self {
        Self { commands }
    }

    /// Current name of the pool carrying `guid`, `None` when it is gone
    async fn resolve(&self, guid: &str) -> Result<Option<String>> {
        match self.commands.resolve_name_by_guid(guid).await {
            Ok(name) => Ok(Some(name)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create a pool
    ///
    /// Nothing is recorded when the command fails; the resource stays absent.
    pub async fn create(&self, request: CreatePoolRequest) -> Result<PoolState> {
        validate_pool_name(&request.name)?;
        request.layout.validate()?;

        let spec = CreationSpec {
            name: request.name.clone(),
            vdev_spec: request.layout.to_vdev_spec(),
            properties: request.properties.clone(),
            force: request.force,
        };

        info!(
            "Creating pool {} via {} ({} vdevs)",
            request.name,
            self.commands.backend_name(),
            request.layout.vdev_count()
        );

        let pool = self
            .commands
            .create(&spec)
            .await
            .map_err(|err| Error::PoolCreation {
                pool: request.name.clone(),
                reason: err.to_string(),
            })?;

        info!("Created pool {} with guid {}", pool.name, pool.guid);

        Ok(PoolState::observe(&pool, &request.properties, request.mode))
    }

    /// Read a pool by GUID
    ///
    /// Returns `None` when no pool carries the GUID any more, which the
    /// caller treats as the resource having been deleted out-of-band.
    pub async fn read(
        &self,
        guid: &str,
        declared: &DeclaredProperties,
        mode: PropertyMode,
    ) -> Result<Option<PoolState>> {
        let name = match self.resolve(guid).await? {
            Some(name) => name,
            None => {
                warn!("Pool with guid {} no longer exists", guid);
                return Ok(None);
            }
        };

        debug!("Resolved guid {} to pool {}", guid, name);

        let pool = match self
            .commands
            .describe(&name, &selection_for(declared, mode))
            .await
        {
            Ok(pool) => pool,
            Err(err) if err.is_not_found() => {
                warn!("Pool {} disappeared while being read", name);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let state = PoolState::observe(&pool, declared, mode);
        for drift in &state.drift {
            warn!(
                "Pool {} property {} drifted: declared {:?}, observed {:?}",
                state.name, drift.name, drift.declared, drift.observed
            );
        }

        Ok(Some(state))
    }

    /// Converge name and declared properties of an existing pool
    ///
    /// The rename runs first; property operations follow against whichever
    /// name the pool has afterwards. Every operation is attempted and all
    /// failures are reported together.
    pub async fn update(&self, request: UpdatePoolRequest) -> Result<PoolState> {
        validate_pool_name(&request.name)?;

        let current = self
            .resolve(&request.guid)
            .await?
            .ok_or_else(|| Error::PoolNotFound {
                pool: request.guid.clone(),
            })?;

        let mut failures = Vec::new();
        let mut target = current.clone();

        if current != request.name {
            info!("Renaming pool {} -> {}", current, request.name);
            match self.commands.rename(&current, &request.name).await {
                Ok(()) => target = request.name.clone(),
                Err(err) => failures.push(MutationFailure {
                    operation: MutationOp::Rename {
                        from: current.clone(),
                        to: request.name.clone(),
                    },
                    reason: err.to_string(),
                }),
            }
        }

        let diff = PropertyDiff::compute(&request.old_properties, &request.new_properties);
        debug!(
            "Pool {}: {} to set, {} to reset, {} unchanged",
            target,
            diff.to_set.len(),
            diff.to_reset.len(),
            diff.unchanged.len()
        );

        for (name, value) in &diff.to_set {
            info!("Setting {}={} on pool {}", name, value, target);
            if let Err(err) = self.commands.set_property(&target, name, value).await {
                failures.push(MutationFailure {
                    operation: MutationOp::SetProperty { name: name.clone() },
                    reason: err.to_string(),
                });
            }
        }

        for name in &diff.to_reset {
            if !catalog::is_resettable(name) {
                debug!(
                    "Property {} is no longer declared but has no resettable default, leaving it",
                    name
                );
                continue;
            }
            info!("Resetting {} on pool {}", name, target);
            if let Err(err) = self.commands.reset_property(&target, name).await {
                failures.push(MutationFailure {
                    operation: MutationOp::ResetProperty { name: name.clone() },
                    reason: err.to_string(),
                });
            }
        }

        if !failures.is_empty() {
            warn!("{} operation(s) failed updating pool {}", failures.len(), target);
            return Err(Error::PoolMutation {
                pool: target,
                failures,
            });
        }

        let state = self
            .read(&request.guid, &request.new_properties, request.mode)
            .await?;
        state.ok_or_else(|| Error::PoolNotFound {
            pool: request.guid.clone(),
        })
    }

    /// Destroy a pool by GUID
    ///
    /// A GUID that no longer resolves counts as already deleted.
    pub async fn delete(&self, guid: &str) -> Result<()> {
        let name = match self.resolve(guid).await? {
            Some(name) => name,
            None => {
                info!("Pool with guid {} is already absent", guid);
                return Ok(());
            }
        };

        info!("Destroying pool {} ({})", name, guid);

        match self.commands.destroy(&name).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => {
                info!("Pool {} vanished before destroy", name);
                Ok(())
            }
            Err(err) => Err(Error::PoolDestruction {
                pool: name,
                reason: err.to_string(),
            }),
        }
    }

    /// Bring an existing pool under management by GUID or name
    ///
    /// Imported pools carry no declared properties, so the mode starts as
    /// `defined`.
    pub async fn import(&self, id_or_name: &str) -> Result<PoolState> {
        let name = match self.resolve(id_or_name).await? {
            Some(name) => name,
            None => id_or_name.to_string(),
        };

        info!("Importing pool {}", name);

        let pool = self
            .commands
            .describe(&name, &PropertySelection::none())
            .await
            .map_err(|err| match err {
                Error::PoolNotFound { .. } => Error::PoolNotFound {
                    pool: id_or_name.to_string(),
                },
                other => other,
            })?;

        Ok(PoolState::observe(
            &pool,
            &DeclaredProperties::new(),
            PropertyMode::default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FailurePlan, InMemoryPools};
    use crate::domain::pool::{Device, Mirror};
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn setup() -> (Arc<InMemoryPools>, PoolController) {
        let backend = Arc::new(InMemoryPools::new());
        let controller = PoolController::new(backend.clone());
        (backend, controller)
    }

    fn declared(pairs: &[(&str, &str)]) -> DeclaredProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn create_request(name: &str, props: &[(&str, &str)]) -> CreatePoolRequest {
        CreatePoolRequest {
            name: name.into(),
            layout: PoolLayout::new(
                vec![Device::new("/dev/sda")],
                vec![Mirror::new(vec![Device::new("/dev/sdb"), Device::new("/dev/sdc")])],
            ),
            properties: declared(props),
            mode: PropertyMode::Defined,
            force: false,
        }
    }

    #[tokio::test]
    async fn test_create_populates_state() {
        let (backend, controller) = setup();

        let state = controller
            .create(create_request("tank", &[("autotrim", "on")]))
            .await
            .unwrap();

        assert!(!state.guid.is_empty());
        assert_eq!(state.display.id, state.guid);
        assert_eq!(state.display.device.len(), 1);
        assert_eq!(state.display.mirror.len(), 1);
        assert_eq!(state.tracked["autotrim"], "on");
        assert_eq!(state.mode, PropertyMode::Defined);
        assert!(state.drift.is_empty());
        assert_eq!(
            backend.journal().await,
            vec!["create tank /dev/sda mirror /dev/sdb /dev/sdc"]
        );
    }

    #[tokio::test]
    async fn test_create_failure_is_creation_error() {
        let (backend, controller) = setup();
        backend
            .set_failures(FailurePlan {
                create: true,
                ..Default::default()
            })
            .await;

        let err = controller
            .create(create_request("tank", &[]))
            .await
            .unwrap_err();

        assert_matches!(err, Error::PoolCreation { pool, .. } if pool == "tank");
        assert!(backend.pool_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_empty_layout() {
        let (backend, controller) = setup();
        let mut request = create_request("tank", &[]);
        request.layout = PoolLayout::default();

        assert_matches!(controller.create(request).await, Err(Error::Topology(_)));
        assert!(backend.journal().await.is_empty());
    }

    #[tokio::test]
    async fn test_read_follows_out_of_band_rename() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[]))
            .await
            .unwrap();

        backend.rename_out_of_band("tank", "renamed").await;

        let state = controller
            .read(&created.guid, &DeclaredProperties::new(), PropertyMode::Defined)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.name, "renamed");
        assert_eq!(state.guid, created.guid);
    }

    #[tokio::test]
    async fn test_read_scopes_properties_to_declared() {
        let (_backend, controller) = setup();
        let props = declared(&[("autotrim", "on")]);
        let created = controller
            .create(create_request("tank", &[("autotrim", "on")]))
            .await
            .unwrap();

        let state = controller
            .read(&created.guid, &props, PropertyMode::Defined)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.display.properties.len(), 1);
        assert_eq!(state.display.properties["autotrim"], "on");

        let state = controller
            .read(&created.guid, &props, PropertyMode::All)
            .await
            .unwrap()
            .unwrap();
        assert!(state.display.properties.contains_key("size"));
        assert!(state.display.properties.contains_key("health"));
    }

    #[tokio::test]
    async fn test_read_missing_pool_is_absent() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[]))
            .await
            .unwrap();

        backend.remove_out_of_band("tank").await;

        let state = controller
            .read(&created.guid, &DeclaredProperties::new(), PropertyMode::Defined)
            .await
            .unwrap();
        assert!(state.is_none());
    }

    #[tokio::test]
    async fn test_read_reports_drift() {
        let (backend, controller) = setup();
        let props = declared(&[("autotrim", "on")]);
        let created = controller
            .create(create_request("tank", &[("autotrim", "on")]))
            .await
            .unwrap();

        backend.set_out_of_band("tank", "autotrim", "off").await;

        let state = controller
            .read(&created.guid, &props, PropertyMode::Defined)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.tracked["autotrim"], "off");
        assert_eq!(state.drift.len(), 1);
        assert_eq!(state.drift[0].name, "autotrim");
    }

    #[tokio::test]
    async fn test_update_renames_before_setting_properties() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[("autotrim", "on")]))
            .await
            .unwrap();

        let state = controller
            .update(UpdatePoolRequest {
                guid: created.guid.clone(),
                name: "data".into(),
                old_properties: declared(&[("autotrim", "on")]),
                new_properties: declared(&[("autotrim", "on"), ("failmode", "continue")]),
                mode: PropertyMode::Defined,
            })
            .await
            .unwrap();

        assert_eq!(state.name, "data");
        assert_eq!(state.tracked["failmode"], "continue");
        let journal = backend.journal().await;
        assert_eq!(
            &journal[1..],
            &["rename tank data".to_string(), "set data failmode=continue".to_string()]
        );
    }

    #[tokio::test]
    async fn test_update_resets_removed_properties() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[("autotrim", "on"), ("compression", "lz4")]))
            .await
            .unwrap();

        let state = controller
            .update(UpdatePoolRequest {
                guid: created.guid.clone(),
                name: "tank".into(),
                old_properties: declared(&[("autotrim", "on"), ("compression", "lz4")]),
                new_properties: DeclaredProperties::new(),
                mode: PropertyMode::Defined,
            })
            .await
            .unwrap();

        assert!(state.tracked.is_empty());
        let journal = backend.journal().await;
        // compression has no known pool default and is left alone
        assert_eq!(&journal[1..], &["reset tank autotrim".to_string()]);
    }

    #[tokio::test]
    async fn test_update_aggregates_failures() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[]))
            .await
            .unwrap();
        backend
            .set_failures(FailurePlan {
                rename: true,
                rejected_properties: ["autotrim".to_string()].into_iter().collect(),
                ..Default::default()
            })
            .await;

        let err = controller
            .update(UpdatePoolRequest {
                guid: created.guid.clone(),
                name: "data".into(),
                old_properties: DeclaredProperties::new(),
                new_properties: declared(&[("autotrim", "on"), ("failmode", "continue")]),
                mode: PropertyMode::Defined,
            })
            .await
            .unwrap_err();

        match err {
            Error::PoolMutation { pool, failures } => {
                assert_eq!(pool, "tank");
                assert_eq!(failures.len(), 2);
                assert_matches!(failures[0].operation, MutationOp::Rename { .. });
                assert_eq!(
                    failures[1].operation,
                    MutationOp::SetProperty {
                        name: "autotrim".into()
                    }
                );
            }
            other => panic!("expected mutation error, got {:?}", other),
        }

        // The independent property still converged
        let state = controller
            .read(&created.guid, &declared(&[("failmode", "continue")]), PropertyMode::Defined)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.tracked["failmode"], "continue");
    }

    #[tokio::test]
    async fn test_delete_clears_pool() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[]))
            .await
            .unwrap();

        controller.delete(&created.guid).await.unwrap();

        assert!(backend.pool_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_backend, controller) = setup();
        assert!(controller.delete("424242").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_failure_is_destruction_error() {
        let (backend, controller) = setup();
        let created = controller
            .create(create_request("tank", &[]))
            .await
            .unwrap();
        backend
            .set_failures(FailurePlan {
                destroy: true,
                ..Default::default()
            })
            .await;

        assert_matches!(
            controller.delete(&created.guid).await,
            Err(Error::PoolDestruction { pool, .. }) if pool == "tank"
        );
        assert_eq!(backend.pool_names().await, vec!["tank"]);
    }

    #[tokio::test]
    async fn test_import_by_guid_and_name() {
        let (backend, controller) = setup();
        let mut local = BTreeMap::new();
        local.insert("autotrim".to_string(), "on".to_string());
        let guid = backend
            .insert_existing(
                "legacy",
                PoolLayout::new(vec![Device::new("/dev/sdz")], vec![]),
                local,
            )
            .await;

        let by_guid = controller.import(&guid).await.unwrap();
        assert_eq!(by_guid.name, "legacy");
        assert_eq!(by_guid.mode, PropertyMode::Defined);
        assert!(by_guid.tracked.is_empty());
        assert_eq!(by_guid.display.device[0].path, "/dev/sdz");

        let by_name = controller.import("legacy").await.unwrap();
        assert_eq!(by_name.guid, guid);
    }

    #[tokio::test]
    async fn test_import_unknown_pool() {
        let (_backend, controller) = setup();
        assert_matches!(
            controller.import("ghost").await,
            Err(Error::PoolNotFound { pool }) if pool == "ghost"
        );
    }
}
