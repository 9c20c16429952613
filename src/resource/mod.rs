//! Declarative Host
//!
//! The outward surface of the reconciler: declaration files, the recorded
//! resource state, and the planner that moves one to the other.

pub mod apply;
pub mod declaration;
pub mod state;

pub use apply::*;
pub use declaration::*;
pub use state::*;
