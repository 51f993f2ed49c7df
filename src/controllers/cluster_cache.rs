//! Cluster cache reconciler.
//!
//! Keyed by cluster identity rather than by ControlPlane. Keeps the remote
//! connection tracker in sync with the set of clusters that ControlPlane
//! objects still reference: once the last referencing object is gone, the
//! cluster's connection and node index are dropped.

use async_trait::async_trait;
use kube::api::{Api, ListParams};
use tracing::{debug, info};

use super::context::Context;
use crate::crd::ControlPlane;
use crate::dispatch::{Action, ObjectKey, Reconciler};
use crate::error::{Error, Result};
use crate::remote::Connector;

pub struct ClusterCacheReconciler<C: Connector> {
    ctx: Context<C>,
}

impl<C: Connector> ClusterCacheReconciler<C> {
    pub fn new(ctx: Context<C>) -> Self {
        Self { ctx }
    }
}

/// Whether any live ControlPlane in the list references the cluster.
fn referenced(items: &[ControlPlane], cluster_name: &str) -> bool {
    items.iter().any(|cp| {
        cp.spec.cluster_name == cluster_name && cp.metadata.deletion_timestamp.is_none()
    })
}

#[async_trait]
impl<C: Connector> Reconciler for ClusterCacheReconciler<C> {
    async fn reconcile(&self, key: ObjectKey) -> Result<Action> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingField(format!("cluster {key} has no namespace")))?;
        let api: Api<ControlPlane> = Api::namespaced(self.ctx.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;

        if referenced(&list.items, &key.name) {
            debug!(cluster = %key, "Cluster still referenced, keeping tracker entry");
            return Ok(Action::requeue(self.ctx.sync_period));
        }

        if self.ctx.tracker.tracked().contains(&key) {
            info!(cluster = %key, "No ControlPlane references cluster, dropping connection");
            self.ctx.tracker.remove(&key);
        }
        Ok(Action::await_change())
    }
}
