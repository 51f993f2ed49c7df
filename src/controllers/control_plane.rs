//! ControlPlane reconciler.
//!
//! Reads the observed member state from the remote workload cluster and
//! writes it back into the ControlPlane's status subresource. The
//! management logic that acts on that state (provisioning, upgrades, node
//! lifecycle) lives outside this process.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use super::context::{Context, FIELD_MANAGER};
use crate::crd::{ControlPlane, ControlPlaneStatus, Phase};
use crate::dispatch::{Action, ObjectKey, Reconciler};
use crate::error::{Error, Result};
use crate::remote::Connector;

pub struct ControlPlaneReconciler<C: Connector> {
    ctx: Context<C>,
}

impl<C: Connector> ControlPlaneReconciler<C> {
    pub fn new(ctx: Context<C>) -> Self {
        Self { ctx }
    }
}

/// Compute the status that reflects the observed remote state.
fn next_status(cp: &ControlPlane, ready_replicas: i32) -> ControlPlaneStatus {
    let was_initialized = cp.status.as_ref().is_some_and(|s| s.initialized);
    ControlPlaneStatus {
        phase: Phase::derive(cp.spec.replicas, ready_replicas, was_initialized),
        ready_replicas,
        initialized: was_initialized || ready_replicas > 0,
        observed_generation: cp.metadata.generation,
    }
}

#[async_trait]
impl<C: Connector> Reconciler for ControlPlaneReconciler<C> {
    async fn reconcile(&self, key: ObjectKey) -> Result<Action> {
        let namespace = key
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingField(format!("ControlPlane {key} has no namespace")))?;
        let api: Api<ControlPlane> = Api::namespaced(self.ctx.client.clone(), namespace);

        let Some(cp) = api.get_opt(&key.name).await? else {
            debug!(object = %key, "ControlPlane no longer exists, nothing to do");
            return Ok(Action::await_change());
        };
        if cp.metadata.deletion_timestamp.is_some() {
            debug!(object = %key, "ControlPlane is being deleted, skipping");
            return Ok(Action::await_change());
        }

        let cluster = ObjectKey::namespaced(namespace, &cp.spec.cluster_name);
        if let Err(err) = self.ctx.tracker.get_connection(&cluster).await {
            self.ctx
                .publish_warning_event(
                    &cp,
                    "RemoteConnectionFailed",
                    "Connect",
                    Some(err.to_string()),
                )
                .await;
            return Err(err);
        }

        // Served from the warm index; at most one remote round-trip if cold.
        let nodes = self.ctx.tracker.nodes(&cluster).await?;
        let ready_replicas = nodes.iter().filter(|n| n.ready).count() as i32;

        let old_phase = cp.status.as_ref().map(|s| s.phase);
        let status = next_status(&cp, ready_replicas);

        if status.phase == Phase::Degraded && old_phase != Some(Phase::Degraded) {
            self.ctx
                .publish_warning_event(
                    &cp,
                    "ControlPlaneDegraded",
                    "ObserveMembers",
                    Some(format!(
                        "{ready_replicas} of {} members ready",
                        cp.spec.replicas
                    )),
                )
                .await;
        }

        let patch = serde_json::json!({
            "apiVersion": ControlPlane::api_version(&()),
            "kind": ControlPlane::kind(&()),
            "status": status,
        });
        api.patch_status(
            &cp.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&patch),
        )
        .await?;

        info!(
            object = %key,
            cluster = %cluster,
            ready_replicas,
            phase = %status.phase,
            "Reconciled ControlPlane"
        );
        Ok(Action::requeue(self.ctx.sync_period))
    }
}
