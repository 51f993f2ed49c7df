//! Health server for Kubernetes probes.
//!
//! Provides:
//! - `/healthz` - Liveness probe, aggregating named liveness checks
//! - `/readyz` - Readiness probe, aggregating named readiness checks
//!
//! Components own their checks: they register a named boolean once at
//! startup and flip it as their state changes. Probes are instantaneous
//! snapshot reads; failing check names are returned in the response body.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::sync::RwLock;
use tracing::info;

/// Shared state for the health server
pub struct HealthState {
    ready_checks: RwLock<BTreeMap<&'static str, bool>>,
    live_checks: RwLock<BTreeMap<&'static str, bool>>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state with no registered checks
    pub fn new() -> Self {
        Self {
            ready_checks: RwLock::new(BTreeMap::new()),
            live_checks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a named readiness check, initially failing
    pub async fn register_ready_check(&self, name: &'static str) {
        self.ready_checks.write().await.insert(name, false);
    }

    /// Register a named liveness check, initially failing
    pub async fn register_live_check(&self, name: &'static str) {
        self.live_checks.write().await.insert(name, false);
    }

    /// Set a readiness check's state (registers it if needed)
    pub async fn set_ready_check(&self, name: &'static str, ok: bool) {
        self.ready_checks.write().await.insert(name, ok);
    }

    /// Set a liveness check's state (registers it if needed)
    pub async fn set_live_check(&self, name: &'static str, ok: bool) {
        self.live_checks.write().await.insert(name, ok);
    }

    /// All registered readiness checks pass
    pub async fn is_ready(&self) -> bool {
        self.ready_checks.read().await.values().all(|ok| *ok)
    }

    /// All registered liveness checks pass
    pub async fn is_live(&self) -> bool {
        self.live_checks.read().await.values().all(|ok| *ok)
    }

    /// Names of currently failing readiness checks
    pub async fn failing_ready(&self) -> Vec<&'static str> {
        self.ready_checks
            .read()
            .await
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Names of currently failing liveness checks
    pub async fn failing_live(&self) -> Vec<&'static str> {
        self.live_checks
            .read()
            .await
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| *name)
            .collect()
    }
}

/// Liveness probe handler
async fn healthz(State(state): State<Arc<HealthState>>) -> Response {
    let failing = state.failing_live().await;
    if failing.is_empty() {
        (StatusCode::OK, "ok").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("failing checks: {}", failing.join(", ")),
        )
            .into_response()
    }
}

/// Readiness probe handler
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    let failing = state.failing_ready().await;
    if failing.is_empty() {
        (StatusCode::OK, "ready").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("failing checks: {}", failing.join(", ")),
        )
            .into_response()
    }
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Run the health server on the given probe address
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    info!(%addr, "Starting health server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
