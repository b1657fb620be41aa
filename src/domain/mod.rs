//! Domain layer - Core types and port definitions
//!
//! This module defines the types the reconciler reasons about and the
//! [`ports::ClusterApi`] trait that cluster adapters implement.

pub mod ports;

pub use ports::*;
