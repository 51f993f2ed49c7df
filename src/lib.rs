//! controlplane-operator library crate
//!
//! This module exports the building blocks of the operator: the CRD
//! definitions, the leader election loop, the bounded dispatcher, the remote
//! cluster tracker, the admission webhook server, and the health surface.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod dispatch;
pub mod error;
pub mod health;
pub mod leader;
pub mod remote;
pub mod watch;
pub mod webhooks;

pub use config::Options;
pub use dispatch::{Action, Dispatcher, ObjectKey, Reconciler};
pub use error::{Error, Result};
pub use health::HealthState;
pub use webhooks::server::run_webhook_server;

use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

/// Label key used to scope which objects the operator watches.
/// When `--watch-filter` is set, only objects carrying this label with the
/// matching value are reconciled.
pub const WATCH_LABEL: &str = "controlplane.example.com/watch-filter";

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}
