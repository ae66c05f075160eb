//! DCops CRD Definitions
//!
//! Kubernetes Custom Resource Definitions owned by the events manager, plus
//! read-only views of the Cluster API objects used to resolve workload
//! cluster topology.

pub mod server;
pub mod capi;

pub use server::*;
pub use capi::*;
