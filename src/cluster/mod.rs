//! Cluster Adapters
//!
//! Provides [`ClusterApi`](crate::domain::ports::ClusterApi) implementations
//! for:
//! - a live cluster through kube-rs
//! - an in-process cluster for tests and benchmarks

pub mod kubernetes;
pub mod memory;

pub use kubernetes::*;
pub use memory::*;
