//! ControlPlane Custom Resource Definition.
//!
//! A ControlPlane describes the desired control plane of a remote workload
//! cluster: how many control-plane members it should run and at which
//! version. The operator reconciles observed state from the remote cluster
//! into the status subresource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ControlPlane is a custom resource describing a workload cluster's control plane.
///
/// Example:
/// ```yaml
/// apiVersion: controlplane.example.com/v1alpha1
/// kind: ControlPlane
/// metadata:
///   name: prod-cp
///   namespace: default
/// spec:
///   clusterName: prod
///   replicas: 3
///   version: v1.31.2
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "controlplane.example.com",
    version = "v1alpha1",
    kind = "ControlPlane",
    plural = "controlplanes",
    shortname = "cp",
    status = "ControlPlaneStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Ready", "type":"integer", "jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneSpec {
    /// Name of the workload cluster this control plane belongs to.
    /// The cluster's kubeconfig is expected in the Secret
    /// `<clusterName>-kubeconfig` in the same namespace.
    pub cluster_name: String,

    /// Desired number of control-plane members (default 3).
    /// Must be odd so the consensus store keeps quorum.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Kubernetes version the control plane should run, e.g. "v1.31.2".
    #[serde(default)]
    pub version: Option<String>,
}

fn default_replicas() -> i32 {
    3
}

/// Observed state of a ControlPlane
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneStatus {
    /// Lifecycle phase derived from ready member count
    #[serde(default)]
    pub phase: Phase,

    /// Number of control-plane members observed Ready on the remote cluster
    #[serde(default)]
    pub ready_replicas: i32,

    /// True once at least one control-plane member has joined
    #[serde(default)]
    pub initialized: bool,

    /// Generation of the spec this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Lifecycle phase of a ControlPlane
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    /// No members observed yet
    #[default]
    Pending,
    /// Members exist but fewer are ready than desired
    Provisioning,
    /// All desired members are ready
    Running,
    /// Previously running, now below the desired ready count
    Degraded,
}

impl Phase {
    /// Derive the phase from the desired and observed member counts.
    pub fn derive(desired: i32, ready: i32, was_initialized: bool) -> Self {
        if ready >= desired {
            Phase::Running
        } else if ready == 0 && !was_initialized {
            Phase::Pending
        } else if was_initialized {
            Phase::Degraded
        } else {
            Phase::Provisioning
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Provisioning => write!(f, "Provisioning"),
            Phase::Running => write!(f, "Running"),
            Phase::Degraded => write!(f, "Degraded"),
        }
    }
}
