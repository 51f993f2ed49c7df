//! Admission pipeline tests against wire-format AdmissionReview payloads.
//!
//! Builds the JSON the API server actually sends and runs it through the
//! typed request extraction and the validation pipeline.

use std::time::Duration;

use kube::core::admission::{AdmissionRequest, AdmissionReview, Operation};
use serde_json::json;

use controlplane_operator::crd::ControlPlane;
use controlplane_operator::webhooks::policies::{ValidationContext, validate_all};
use controlplane_operator::webhooks::quorum::EtcdQuorumPolicy;
use controlplane_operator::webhooks::server::{VALIDATION_DEADLINE, validate_with_deadline};

fn control_plane_json(name: &str, replicas: i32) -> serde_json::Value {
    json!({
        "apiVersion": "controlplane.example.com/v1alpha1",
        "kind": "ControlPlane",
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": "11111111-2222-3333-4444-555555555555"
        },
        "spec": {
            "clusterName": "prod",
            "replicas": replicas
        }
    })
}

fn review(
    operation: &str,
    object: Option<serde_json::Value>,
    old_object: Option<serde_json::Value>,
) -> AdmissionReview<ControlPlane> {
    let value = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
            "kind": {
                "group": "controlplane.example.com",
                "version": "v1alpha1",
                "kind": "ControlPlane"
            },
            "resource": {
                "group": "controlplane.example.com",
                "version": "v1alpha1",
                "resource": "controlplanes"
            },
            "requestKind": {
                "group": "controlplane.example.com",
                "version": "v1alpha1",
                "kind": "ControlPlane"
            },
            "requestResource": {
                "group": "controlplane.example.com",
                "version": "v1alpha1",
                "resource": "controlplanes"
            },
            "name": "prod-cp",
            "namespace": "default",
            "operation": operation,
            "userInfo": {"username": "system:serviceaccount:kube-system:generic"},
            "object": object,
            "oldObject": old_object,
            "dryRun": false
        }
    });
    serde_json::from_value(value).expect("well-formed AdmissionReview")
}

#[tokio::test]
async fn test_update_scale_down_below_quorum_is_denied() {
    let review = review(
        "UPDATE",
        Some(control_plane_json("prod-cp", 1)),
        Some(control_plane_json("prod-cp", 3)),
    );
    let request: AdmissionRequest<ControlPlane> = review.try_into().unwrap();

    let object = request.object.as_ref().unwrap();
    let old = request.old_object.as_ref();
    let ctx = ValidationContext {
        resource: object,
        old_resource: old,
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    };

    let result = validate_with_deadline(VALIDATION_DEADLINE, &ctx, &EtcdQuorumPolicy).await;
    assert!(!result.allowed);
    assert_eq!(result.reason.as_deref(), Some("QuorumViolation"));
    assert!(
        !result.message.unwrap().is_empty(),
        "denial must explain which rule was violated"
    );
}

#[tokio::test]
async fn test_update_scale_up_one_step_is_allowed() {
    let review = review(
        "UPDATE",
        Some(control_plane_json("prod-cp", 5)),
        Some(control_plane_json("prod-cp", 3)),
    );
    let request: AdmissionRequest<ControlPlane> = review.try_into().unwrap();

    let object = request.object.as_ref().unwrap();
    let ctx = ValidationContext {
        resource: object,
        old_resource: request.old_object.as_ref(),
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    };

    let result = validate_all(&ctx, &EtcdQuorumPolicy).await;
    assert!(result.allowed);
}

#[tokio::test]
async fn test_update_renaming_cluster_is_denied() {
    let mut renamed = control_plane_json("prod-cp", 3);
    renamed["spec"]["clusterName"] = json!("staging");
    let review = review(
        "UPDATE",
        Some(renamed),
        Some(control_plane_json("prod-cp", 3)),
    );
    let request: AdmissionRequest<ControlPlane> = review.try_into().unwrap();

    let object = request.object.as_ref().unwrap();
    let ctx = ValidationContext {
        resource: object,
        old_resource: request.old_object.as_ref(),
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    };

    let result = validate_all(&ctx, &EtcdQuorumPolicy).await;
    assert!(!result.allowed);
    assert_eq!(result.reason.as_deref(), Some("ImmutableField"));
}

#[tokio::test]
async fn test_delete_review_parses_without_object() {
    let review = review("DELETE", None, Some(control_plane_json("prod-cp", 3)));
    let request: AdmissionRequest<ControlPlane> = review.try_into().unwrap();
    // The handler short-circuits DELETE to an allow before any policy runs.
    assert_eq!(request.operation, Operation::Delete);
    assert!(request.object.is_none());
}

#[tokio::test]
async fn test_dry_run_flag_reaches_policies() {
    let value = review(
        "CREATE",
        Some(control_plane_json("prod-cp", 3)),
        None,
    );
    let mut request: AdmissionRequest<ControlPlane> = value.try_into().unwrap();
    request.dry_run = true;

    let object = request.object.as_ref().unwrap();
    let ctx = ValidationContext {
        resource: object,
        old_resource: None,
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    };
    assert!(ctx.dry_run);

    // Dry-run requests are validated like any other.
    let result = validate_with_deadline(Duration::from_secs(1), &ctx, &EtcdQuorumPolicy).await;
    assert!(result.allowed);
}
