//! Apply Planner
//!
//! Compares a declaration with the recorded resource state, decides what has
//! to happen, and drives the controller to get there. State is saved after
//! every step that observed the pool, so a failed update still leaves the
//! refreshed picture on disk.

use crate::controller::{CreatePoolRequest, PoolController, UpdatePoolRequest};
use crate::domain::pool::{PoolLayout, PropertyMode};
use crate::error::{Error, Result};
use crate::properties::PropertyDiff;
use crate::resource::declaration::DesiredPool;
use crate::resource::state::{PoolResourceState, StateStore};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

// =============================================================================
// Plan
// =============================================================================

/// What an apply run has to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlannedAction {
    /// No pool is recorded yet
    Create,

    /// Converge name, properties or mode in place
    Update {
        #[serde(skip_serializing_if = "Option::is_none")]
        rename: Option<(String, String)>,
        #[serde(skip)]
        diff: PropertyDiff,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode_change: Option<(PropertyMode, PropertyMode)>,
    },

    /// The layout changed, so the pool has to be destroyed and recreated
    Replace { reason: String },

    NoOp,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedAction::Create => write!(f, "create"),
            PlannedAction::Update {
                rename,
                diff,
                mode_change,
            } => {
                let mut parts = Vec::new();
                if let Some((from, to)) = rename {
                    parts.push(format!("rename {} -> {}", from, to));
                }
                if !diff.to_set.is_empty() {
                    parts.push(format!("set {}", diff.to_set.len()));
                }
                if !diff.to_reset.is_empty() {
                    parts.push(format!("reset {}", diff.to_reset.len()));
                }
                if let Some((from, to)) = mode_change {
                    parts.push(format!("mode {} -> {}", from, to));
                }
                write!(f, "update ({})", parts.join(", "))
            }
            PlannedAction::Replace { reason } => write!(f, "replace ({})", reason),
            PlannedAction::NoOp => write!(f, "no-op"),
        }
    }
}

/// Decide how to move from the recorded state to the desired pool
///
/// The layout is compared against the layout recorded at the last apply,
/// not against what the subsystem reports, since the subsystem may show
/// devices under different paths.
pub fn plan(desired: &DesiredPool, current: Option<&PoolResourceState>) -> PlannedAction {
    let current = match current {
        Some(current) => current,
        None => return PlannedAction::Create,
    };

    let applied = PoolLayout::from_blocks(&current.device, &current.mirror);
    if applied != desired.layout {
        return PlannedAction::Replace {
            reason: format!(
                "layout changed from '{}' to '{}'",
                applied.to_vdev_spec(),
                desired.layout.to_vdev_spec()
            ),
        };
    }

    let rename = (current.name != desired.name)
        .then(|| (current.name.clone(), desired.name.clone()));
    let diff = PropertyDiff::compute(&current.property, &desired.properties);
    let mode_change = (current.property_mode != desired.mode)
        .then_some((current.property_mode, desired.mode));

    if rename.is_none() && diff.is_empty() && mode_change.is_none() {
        return PlannedAction::NoOp;
    }

    PlannedAction::Update {
        rename,
        diff,
        mode_change,
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Switches for one apply run
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    /// Allow destroying and recreating the pool on layout changes
    pub allow_replace: bool,
    /// Pass `-f` to pool creation
    pub force: bool,
}

/// Result of an apply run
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub action: PlannedAction,
    pub state: PoolResourceState,
}

/// Drives one pool resource from declaration to recorded state
pub struct Reconciler {
    controller: PoolController,
    store: StateStore,
}

impl Reconciler {
    pub fn new(controller: PoolController, store: StateStore) -> Self {
        Self { controller, store }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Recorded state without touching the pool
    pub async fn show(&self) -> Result<Option<PoolResourceState>> {
        self.store.load().await
    }

    /// Re-read the recorded pool and persist what was observed
    ///
    /// A pool that no longer exists is forgotten and `None` is returned.
    pub async fn refresh(&self) -> Result<Option<PoolResourceState>> {
        let mut recorded = match self.store.load().await? {
            Some(recorded) => recorded,
            None => return Ok(None),
        };

        let observed = self
            .controller
            .read(&recorded.id, &recorded.property, recorded.property_mode)
            .await?;

        match observed {
            Some(state) => {
                recorded.refresh(state);
                self.store.save(&recorded).await?;
                Ok(Some(recorded))
            }
            None => {
                warn!(
                    "Pool {} ({}) is gone, forgetting it",
                    recorded.name, recorded.id
                );
                self.store.clear().await?;
                Ok(None)
            }
        }
    }

    /// Converge the pool to `desired`
    pub async fn apply(&self, desired: &DesiredPool, options: ApplyOptions) -> Result<ApplyOutcome> {
        let current = self.refresh().await?;
        let action = plan(desired, current.as_ref());

        info!("Planned {} for pool {}", action, desired.name);

        let state = match (&action, current) {
            (PlannedAction::NoOp, Some(current)) => current,
            (PlannedAction::Update { .. }, Some(current)) => self.update(desired, current).await?,
            (PlannedAction::Replace { reason }, Some(current)) => {
                if !options.allow_replace {
                    return Err(Error::Configuration(format!(
                        "pool {} must be replaced ({}); rerun with replacement allowed",
                        current.name, reason
                    )));
                }
                warn!("Replacing pool {}: {}", current.name, reason);
                self.controller.delete(&current.id).await?;
                self.store.clear().await?;
                self.create(desired, options.force).await?
            }
            _ => self.create(desired, options.force).await?,
        };

        Ok(ApplyOutcome { action, state })
    }

    async fn create(&self, desired: &DesiredPool, force: bool) -> Result<PoolResourceState> {
        let observed = self
            .controller
            .create(CreatePoolRequest {
                name: desired.name.clone(),
                layout: desired.layout.clone(),
                properties: desired.properties.clone(),
                mode: desired.mode,
                force,
            })
            .await?;

        let (device, mirror) = desired.layout.to_blocks();
        let state = PoolResourceState::new(observed, device, mirror);
        self.store.save(&state).await?;
        Ok(state)
    }

    async fn update(
        &self,
        desired: &DesiredPool,
        mut current: PoolResourceState,
    ) -> Result<PoolResourceState> {
        let observed = self
            .controller
            .update(UpdatePoolRequest {
                guid: current.id.clone(),
                name: desired.name.clone(),
                old_properties: current.property.clone(),
                new_properties: desired.properties.clone(),
                mode: desired.mode,
            })
            .await?;

        current.refresh(observed);
        self.store.save(&current).await?;
        Ok(current)
    }

    /// Destroy the recorded pool and forget it
    ///
    /// Returns false when nothing was recorded. A failed destroy keeps the
    /// state file.
    pub async fn destroy(&self) -> Result<bool> {
        let recorded = match self.store.load().await? {
            Some(recorded) => recorded,
            None => return Ok(false),
        };

        self.controller.delete(&recorded.id).await?;
        self.store.clear().await?;
        Ok(true)
    }

    /// Start managing an existing pool
    ///
    /// The observed layout becomes the applied layout.
    pub async fn import(&self, id_or_name: &str) -> Result<PoolResourceState> {
        if let Some(recorded) = self.store.load().await? {
            return Err(Error::Configuration(format!(
                "state {} already tracks pool {} ({})",
                self.store.path().display(),
                recorded.name,
                recorded.id
            )));
        }

        let observed = self.controller.import(id_or_name).await?;
        let device = observed.display.device.clone();
        let mirror = observed.display.mirror.clone();
        let state = PoolResourceState::new(observed, device, mirror);
        self.store.save(&state).await?;

        info!("Imported pool {} ({})", state.name, state.id);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FailurePlan, InMemoryPools};
    use crate::domain::pool::{Device, Mirror};
    use crate::properties::DeclaredProperties;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        backend: Arc<InMemoryPools>,
        reconciler: Reconciler,
        _dir: TempDir,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(InMemoryPools::new());
        let reconciler = Reconciler::new(
            PoolController::new(backend.clone()),
            StateStore::new(dir.path().join("tank.json")),
        );
        Fixture {
            backend,
            reconciler,
            _dir: dir,
        }
    }

    fn desired(name: &str, props: &[(&str, &str)]) -> DesiredPool {
        DesiredPool {
            name: name.into(),
            layout: PoolLayout::new(
                vec![Device::new("/dev/sda")],
                vec![Mirror::new(vec![Device::new("/dev/sdb"), Device::new("/dev/sdc")])],
            ),
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mode: PropertyMode::Defined,
        }
    }

    #[test]
    fn test_plan_without_state_creates() {
        assert_eq!(plan(&desired("tank", &[]), None), PlannedAction::Create);
    }

    #[tokio::test]
    async fn test_apply_creates_then_noop() {
        let f = setup();
        let pool = desired("tank", &[("autotrim", "on")]);

        let first = f.reconciler.apply(&pool, ApplyOptions::default()).await.unwrap();
        assert_eq!(first.action, PlannedAction::Create);
        assert_eq!(first.state.name, "tank");
        assert_eq!(first.state.property["autotrim"], "on");
        assert_eq!(first.state.device.len(), 1);

        let second = f.reconciler.apply(&pool, ApplyOptions::default()).await.unwrap();
        assert_eq!(second.action, PlannedAction::NoOp);
        assert_eq!(second.state.id, first.state.id);
        assert_eq!(f.backend.journal().await.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_updates_in_place() {
        let f = setup();
        f.reconciler
            .apply(&desired("tank", &[("autotrim", "on")]), ApplyOptions::default())
            .await
            .unwrap();

        let outcome = f
            .reconciler
            .apply(&desired("data", &[("failmode", "continue")]), ApplyOptions::default())
            .await
            .unwrap();

        assert_matches!(
            &outcome.action,
            PlannedAction::Update { rename: Some((from, to)), .. } if from == "tank" && to == "data"
        );
        assert_eq!(outcome.state.name, "data");
        assert_eq!(outcome.state.property.len(), 1);
        assert_eq!(outcome.state.property["failmode"], "continue");
        assert_eq!(
            &f.backend.journal().await[1..],
            &[
                "rename tank data".to_string(),
                "set data failmode=continue".to_string(),
                "reset data autotrim".to_string(),
            ]
        );

        let recorded = f.reconciler.show().await.unwrap().unwrap();
        assert_eq!(recorded.name, "data");
    }

    #[tokio::test]
    async fn test_apply_mode_change_runs_no_commands() {
        let f = setup();
        f.reconciler
            .apply(&desired("tank", &[("autotrim", "on")]), ApplyOptions::default())
            .await
            .unwrap();

        let mut strict = desired("tank", &[("autotrim", "on")]);
        strict.mode = PropertyMode::All;
        let outcome = f.reconciler.apply(&strict, ApplyOptions::default()).await.unwrap();

        assert_eq!(
            outcome.action,
            PlannedAction::Update {
                rename: None,
                diff: PropertyDiff {
                    unchanged: ["autotrim".to_string()].into_iter().collect(),
                    ..Default::default()
                },
                mode_change: Some((PropertyMode::Defined, PropertyMode::All)),
            }
        );
        assert_eq!(outcome.state.property_mode, PropertyMode::All);
        assert!(outcome.state.drift.is_empty());
        assert_eq!(f.backend.journal().await.len(), 1);

        let recorded = f.reconciler.show().await.unwrap().unwrap();
        assert_eq!(recorded.property_mode, PropertyMode::All);
    }

    #[tokio::test]
    async fn test_apply_corrects_drift() {
        let f = setup();
        let pool = desired("tank", &[("autotrim", "on")]);
        f.reconciler.apply(&pool, ApplyOptions::default()).await.unwrap();

        f.backend.set_out_of_band("tank", "autotrim", "off").await;

        let outcome = f.reconciler.apply(&pool, ApplyOptions::default()).await.unwrap();
        assert_matches!(outcome.action, PlannedAction::Update { .. });
        assert_eq!(outcome.state.property["autotrim"], "on");
        assert!(outcome.state.drift.is_empty());
    }

    #[tokio::test]
    async fn test_layout_change_needs_replace() {
        let f = setup();
        let created = f
            .reconciler
            .apply(&desired("tank", &[]), ApplyOptions::default())
            .await
            .unwrap();

        let mut changed = desired("tank", &[]);
        changed.layout.striped.push(Device::new("/dev/sdd"));

        assert_matches!(
            f.reconciler.apply(&changed, ApplyOptions::default()).await,
            Err(Error::Configuration(_))
        );
        assert_eq!(f.backend.pool_names().await, vec!["tank"]);

        let replaced = f
            .reconciler
            .apply(
                &changed,
                ApplyOptions {
                    allow_replace: true,
                    force: false,
                },
            )
            .await
            .unwrap();
        assert_matches!(replaced.action, PlannedAction::Replace { .. });
        assert_ne!(replaced.state.id, created.state.id);
        assert_eq!(replaced.state.device.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_forgets_deleted_pool() {
        let f = setup();
        f.reconciler
            .apply(&desired("tank", &[]), ApplyOptions::default())
            .await
            .unwrap();

        f.backend.remove_out_of_band("tank").await;

        assert!(f.reconciler.refresh().await.unwrap().is_none());
        assert!(f.reconciler.show().await.unwrap().is_none());

        let outcome = f
            .reconciler
            .apply(&desired("tank", &[]), ApplyOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.action, PlannedAction::Create);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_refreshed_state() {
        let f = setup();
        let created = f
            .reconciler
            .apply(&desired("tank", &[]), ApplyOptions::default())
            .await
            .unwrap();
        f.backend
            .set_failures(FailurePlan {
                rejected_properties: ["autotrim".to_string()].into_iter().collect(),
                ..Default::default()
            })
            .await;

        let err = f
            .reconciler
            .apply(&desired("tank", &[("autotrim", "on")]), ApplyOptions::default())
            .await
            .unwrap_err();
        assert_matches!(err, Error::PoolMutation { .. });

        let recorded = f.reconciler.show().await.unwrap().unwrap();
        assert_eq!(recorded.id, created.state.id);
        assert!(recorded.property.is_empty());
    }

    #[tokio::test]
    async fn test_destroy() {
        let f = setup();
        f.reconciler
            .apply(&desired("tank", &[]), ApplyOptions::default())
            .await
            .unwrap();

        assert!(f.reconciler.destroy().await.unwrap());
        assert!(f.backend.pool_names().await.is_empty());
        assert!(!f.reconciler.destroy().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_state() {
        let f = setup();
        f.reconciler
            .apply(&desired("tank", &[]), ApplyOptions::default())
            .await
            .unwrap();
        f.backend
            .set_failures(FailurePlan {
                destroy: true,
                ..Default::default()
            })
            .await;

        assert_matches!(
            f.reconciler.destroy().await,
            Err(Error::PoolDestruction { .. })
        );
        assert!(f.reconciler.show().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_then_apply_is_noop() {
        let f = setup();
        let mut local = BTreeMap::new();
        local.insert("autotrim".to_string(), "on".to_string());
        f.backend
            .insert_existing(
                "legacy",
                PoolLayout::new(vec![Device::new("/dev/sda")], vec![]),
                local,
            )
            .await;

        let imported = f.reconciler.import("legacy").await.unwrap();
        assert_eq!(imported.name, "legacy");
        assert_eq!(imported.device[0].path, "/dev/sda");

        assert_matches!(
            f.reconciler.import("legacy").await,
            Err(Error::Configuration(_))
        );

        let pool = DesiredPool {
            name: "legacy".into(),
            layout: PoolLayout::new(vec![Device::new("/dev/sda")], vec![]),
            properties: DeclaredProperties::new(),
            mode: PropertyMode::Defined,
        };
        let outcome = f.reconciler.apply(&pool, ApplyOptions::default()).await.unwrap();
        assert_eq!(outcome.action, PlannedAction::NoOp);
    }
}
