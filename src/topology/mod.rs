//! Pool Topology
//!
//! Encoding of pool layouts for the create command and their projection
//! into host-facing records.

pub mod codec;

pub use codec::*;
