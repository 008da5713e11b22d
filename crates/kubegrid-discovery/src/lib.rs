//! KubeGrid Discovery - Cluster member discovery backed by Kubernetes
//!
//! A [`KubernetesDiscoveryStrategy`] is built once from a property map and selects either
//! DNS resolution of a headless service or a lookup of the service's endpoints through the
//! Kubernetes API. The membership engine then drives it through `start`, any number of
//! `discover_nodes` rounds, and `destroy`.

pub mod address;
pub mod api;
pub mod dns;
pub mod service;
pub mod strategy;

pub use address::*;
pub use api::*;
pub use dns::*;
pub use service::*;
pub use strategy::*;
