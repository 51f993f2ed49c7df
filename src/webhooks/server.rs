//! Admission webhook server.
//!
//! Provides HTTP endpoints for Kubernetes admission webhooks.
//!
//! To enable webhooks:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a ValidatingWebhookConfiguration
//! 3. Mount the TLS certificate secret to the operator pod at /etc/webhook/certs/
//!
//! The webhook server starts automatically when certificates are present.
//! Validation runs under a hard deadline; a policy that cannot answer in
//! time results in denial, never a silent admission.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use kube::Resource;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info, warn};

use crate::crd::ControlPlane;
use crate::error::{Error, Result};
use crate::health::HealthState;
use crate::webhooks::policies::{ValidationContext, ValidationResult, validate_all};
use crate::webhooks::quorum::QuorumPolicy;

/// TLS certificate file name inside the mounted cert directory
pub const WEBHOOK_CERT_FILE: &str = "tls.crt";
/// TLS private key file name inside the mounted cert directory
pub const WEBHOOK_KEY_FILE: &str = "tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 9443;
/// Upper bound on validation latency. The API server gives webhooks 10s by
/// default; answering within half of that leaves room for retries.
pub const VALIDATION_DEADLINE: Duration = Duration::from_secs(5);

/// Health check name published by the webhook server
pub const WEBHOOK_CHECK: &str = "webhook";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub quorum: Arc<dyn QuorumPolicy>,
}

impl WebhookState {
    pub fn new(quorum: Arc<dyn QuorumPolicy>) -> Self {
        Self { quorum }
    }
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
fn deny_with_reason<T: Resource<DynamicType = ()>>(
    request: &AdmissionRequest<T>,
    message: &str,
    reason: &str,
) -> AdmissionReview<kube::core::DynamicObject> {
    let full_message = format!("[{}] {}", reason, message);
    AdmissionResponse::from(request)
        .deny(full_message)
        .into_review()
}

/// Run the validation policies under the hard deadline, denying on expiry
pub async fn validate_with_deadline(
    deadline: Duration,
    ctx: &ValidationContext<'_>,
    quorum: &dyn QuorumPolicy,
) -> ValidationResult {
    match tokio::time::timeout(deadline, validate_all(ctx, quorum)).await {
        Ok(result) => result,
        Err(_) => ValidationResult::denied(
            "ValidationTimeout",
            &format!(
                "validation did not complete within {}s; denying to stay safe",
                deadline.as_secs()
            ),
        ),
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/validate-controlplane", post(validate_controlplane))
        .with_state(state)
}

/// Validate a ControlPlane admission webhook handler
async fn validate_controlplane(
    State(state): State<Arc<WebhookState>>,
    Json(review): Json<AdmissionReview<ControlPlane>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<ControlPlane> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let uid = &request.uid;
    debug!(
        uid = %uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = ?request.name,
        "Processing admission request"
    );

    // DELETE operations are always allowed
    if request.operation == Operation::Delete {
        info!(uid = %uid, "Admission request allowed (DELETE)");
        return (
            StatusCode::OK,
            Json(AdmissionResponse::from(&request).into_review()),
        );
    }

    let resource: ControlPlane = match &request.object {
        Some(obj) => obj.clone(),
        None => {
            error!(uid = %uid, "Missing object in request");
            return (
                StatusCode::OK,
                Json(deny_with_reason(
                    &request,
                    "Missing object in request",
                    "InvalidRequest",
                )),
            );
        }
    };

    // Old object is present on UPDATE operations
    let old_resource: Option<ControlPlane> = request.old_object.clone();

    let ctx = ValidationContext {
        resource: &resource,
        old_resource: old_resource.as_ref(),
        dry_run: request.dry_run,
        namespace: request.namespace.as_deref(),
    };

    let result = validate_with_deadline(VALIDATION_DEADLINE, &ctx, state.quorum.as_ref()).await;

    if !result.allowed {
        let reason = result
            .reason
            .unwrap_or_else(|| "ValidationFailed".to_string());
        let message = result
            .message
            .unwrap_or_else(|| "Validation failed".to_string());
        warn!(uid = %uid, reason = %reason, message = %message, "Admission request denied");
        return (
            StatusCode::OK,
            Json(deny_with_reason(&request, &message, &reason)),
        );
    }

    info!(uid = %uid, "Admission request allowed");
    (
        StatusCode::OK,
        Json(AdmissionResponse::from(&request).into_review()),
    )
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0 on the given port and serves /validate-controlplane.
/// TLS material is loaded from `tls.crt` and `tls.key` in `cert_dir`.
/// The named webhook health checks stay failing until the listener is
/// bound, then flip to passing.
pub async fn run_webhook_server(
    quorum: Arc<dyn QuorumPolicy>,
    health: Arc<HealthState>,
    cert_dir: &Path,
    port: u16,
) -> Result<()> {
    let state = Arc::new(WebhookState::new(quorum));
    let app = create_webhook_router(state);

    let cert_path = cert_dir.join(WEBHOOK_CERT_FILE);
    let key_path = cert_dir.join(WEBHOOK_KEY_FILE);
    let config = RustlsConfig::from_pem_file(&cert_path, &key_path)
        .await
        .map_err(|e| Error::TlsConfig(format!("loading {}: {}", cert_path.display(), e)))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let handle = axum_server::Handle::new();

    // Flip the webhook health checks once the listener is actually bound.
    let listening = handle.clone();
    let probe_state = health.clone();
    tokio::spawn(async move {
        if listening.listening().await.is_some() {
            info!(port, "Webhook server listening with TLS");
            probe_state.set_ready_check(WEBHOOK_CHECK, true).await;
            probe_state.set_live_check(WEBHOOK_CHECK, true).await;
        }
    });

    let result = axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await;

    health.set_ready_check(WEBHOOK_CHECK, false).await;
    health.set_live_check(WEBHOOK_CHECK, false).await;

    result.map_err(|e| Error::WebhookServer(e.to_string()))
}
