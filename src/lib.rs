//! ZFS Pool Reconciler
//!
//! Declarative lifecycle management for ZFS storage pools: a pool is
//! described once (name, layout, owned properties) and the reconciler
//! creates it, keeps its name and properties convergent, reports drift,
//! and destroys it again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                 Declarative Host (zpoolctl / resource)              │
//! │   declaration.yaml ──▶ plan ──▶ apply ──▶ state.json                │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                     Lifecycle Controller                            │
//! │        create │ read │ update │ delete │ import  (by GUID)          │
//! ├──────────────────────────────┬──────────────────────────────────────┤
//! │       Topology Codec         │    Property Reconciliation Engine    │
//! │  layout <-> vdev spec        │  diff │ drift │ display state        │
//! ├──────────────────────────────┴──────────────────────────────────────┤
//! │                     Pool Command Backends                           │
//! │  ┌──────────────────────────┐  ┌──────────────────────────────────┐ │
//! │  │   zpool (CLI adapter)    │  │   memory (in-process fake)       │ │
//! │  └──────────────────────────┘  └──────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`topology`]: Layout encoding and host projection
//! - [`properties`]: Property diffs, drift detection and the property catalog
//! - [`controller`]: Pool lifecycle controller
//! - [`backends`]: Pool command adapters
//! - [`resource`]: Declarations, recorded state and the apply planner
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod backends;
pub mod controller;
pub mod domain;
pub mod error;
pub mod properties;
pub mod resource;
pub mod topology;

// Re-export commonly used types
pub use backends::{BackendFactory, FailurePlan, InMemoryPools, ZpoolCli, ZpoolCliConfig};

pub use controller::{CreatePoolRequest, PoolController, PoolState, UpdatePoolRequest};

pub use domain::pool::{
    Device, Mirror, Pool, PoolLayout, Property, PropertyMode, PropertySource,
};

pub use domain::ports::{CreationSpec, PoolCommands, PoolCommandsRef, PropertySelection};

pub use error::{Error, MutationFailure, MutationOp, Result};

pub use properties::{
    DeclaredProperties, PoolDisplay, PropertyBlock, PropertyDiff, PropertyDrift,
};

pub use resource::{
    plan, ApplyOptions, ApplyOutcome, DesiredPool, PlannedAction, PoolDeclaration,
    PoolResourceState, Reconciler, StateStore,
};

pub use topology::{decode_vdev_spec, encode_vdev_spec, DeviceBlock, MirrorBlock};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
