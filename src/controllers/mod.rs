//! Reconcilers registered with the dispatcher.
//!
//! Two controllers share the dispatcher: one reconciles ControlPlane
//! objects against their remote clusters, the other garbage-collects
//! tracker entries for clusters no ControlPlane references any more.

pub mod cluster_cache;
pub mod context;
pub mod control_plane;

pub use cluster_cache::ClusterCacheReconciler;
pub use context::{Context, FIELD_MANAGER};
pub use control_plane::ControlPlaneReconciler;

/// Dispatcher registration name for the ControlPlane controller
pub const CONTROLPLANE_CONTROLLER: &str = "controlplane";
/// Dispatcher registration name for the cluster cache controller
pub const CLUSTER_CACHE_CONTROLLER: &str = "cluster-cache";
