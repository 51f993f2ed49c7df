//! controlplane-operator - manages ControlPlane resources across remote clusters.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Runs leader election (required for HA deployments)
//! - Starts the dispatcher, watch sources, health server, and optionally
//!   the admission webhook server

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use controlplane_operator::config::Options;
use controlplane_operator::controllers::{
    CLUSTER_CACHE_CONTROLLER, CONTROLPLANE_CONTROLLER, ClusterCacheReconciler, Context,
    ControlPlaneReconciler,
};
use controlplane_operator::dispatch::Dispatcher;
use controlplane_operator::health::{HealthState, run_health_server};
use controlplane_operator::leader::{KubeLeaseBackend, LeaderElection};
use controlplane_operator::remote::{ClusterTracker, KubeConnector};
use controlplane_operator::webhooks::quorum::EtcdQuorumPolicy;
use controlplane_operator::webhooks::server::{
    WEBHOOK_CERT_FILE, WEBHOOK_CHECK, WEBHOOK_KEY_FILE, run_webhook_server,
};
use controlplane_operator::{watch as sources, webhooks};

/// Health check name for the dispatcher
const DISPATCHER_CHECK: &str = "dispatcher";

/// Interval between background health probes of remote clusters
const REMOTE_HEALTH_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("controlplane_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .json()
        .init();

    let opts = Options::parse();
    info!(
        metrics_bind_addr = %opts.metrics_bind_addr,
        "Starting controlplane-operator"
    );

    // Create Kubernetes client for the management cluster
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Shutdown signal shared by every component
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared health state; probes work even as non-leader
    let health_state = Arc::new(HealthState::new());
    health_state.register_ready_check(DISPATCHER_CHECK).await;
    let health_handle = {
        let health_state = health_state.clone();
        let addr = opts.health_addr;
        tokio::spawn(async move { run_health_server(health_state, addr).await })
    };

    // Leader election: only the lease holder dispatches work
    let election = if opts.leader_elect {
        let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        });
        let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
            warn!("POD_NAMESPACE not set, using 'default'");
            "default".to_string()
        });
        info!(holder_id = %pod_name, namespace = %namespace, "Leader election enabled");
        let backend = Arc::new(KubeLeaseBackend::new(
            client.clone(),
            &namespace,
            &pod_name,
            opts.leader_elect_lease_duration,
        ));
        LeaderElection::new(
            backend,
            opts.leader_elect_renew_deadline,
            opts.leader_elect_retry_period,
        )
    } else {
        info!("Leader election disabled");
        LeaderElection::always_leader()
    };
    let leader_rx = election.subscribe();
    let election_handle = tokio::spawn(election.run(shutdown_rx.clone()));

    // Remote cluster connection cache with background health checks
    let connector = KubeConnector::new(client.clone(), opts.remote_dial_timeout);
    let tracker = Arc::new(ClusterTracker::new(connector, REMOTE_HEALTH_INTERVAL));
    let tracker_handle = tokio::spawn(tracker.clone().run_health_checks(shutdown_rx.clone()));

    // Register controllers; a duplicate name here is a startup bug
    let ctx = Context::new(client.clone(), tracker.clone(), opts.sync_period);
    let mut dispatcher = Dispatcher::new(leader_rx);
    dispatcher.register(
        CONTROLPLANE_CONTROLLER,
        opts.controlplane_concurrency,
        Arc::new(ControlPlaneReconciler::new(ctx.clone())),
    )?;
    dispatcher.register(
        CLUSTER_CACHE_CONTROLLER,
        1,
        Arc::new(ClusterCacheReconciler::new(ctx)),
    )?;
    let dispatcher = Arc::new(dispatcher);
    health_state.set_ready_check(DISPATCHER_CHECK, true).await;

    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(shutdown_rx.clone()));

    // Watch sources feed the dispatcher
    let watch_handle = {
        let client = client.clone();
        let dispatcher = dispatcher.clone();
        let namespace = opts.namespace.clone();
        let watch_filter = opts.watch_filter.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            sources::run_watch(
                client,
                dispatcher,
                namespace.as_deref(),
                watch_filter.as_deref(),
                shutdown,
            )
            .await;
        })
    };
    let resync_handle = {
        let client = client.clone();
        let dispatcher = dispatcher.clone();
        let namespace = opts.namespace.clone();
        let watch_filter = opts.watch_filter.clone();
        let sync_period = opts.sync_period;
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            sources::run_resync(
                client,
                dispatcher,
                namespace.as_deref(),
                watch_filter.as_deref(),
                sync_period,
                shutdown,
            )
            .await;
        })
    };

    // Optionally start webhook server if certificates are available
    let cert_path = opts.webhook_cert_dir.join(WEBHOOK_CERT_FILE);
    let key_path = opts.webhook_cert_dir.join(WEBHOOK_KEY_FILE);
    let webhook_handle = if cert_path.exists() && key_path.exists() {
        info!("TLS certificates found, starting webhook server");
        health_state.register_ready_check(WEBHOOK_CHECK).await;
        health_state.register_live_check(WEBHOOK_CHECK).await;
        let quorum: Arc<dyn webhooks::quorum::QuorumPolicy> = Arc::new(EtcdQuorumPolicy);
        let health = health_state.clone();
        let cert_dir = opts.webhook_cert_dir.clone();
        let port = opts.webhook_port;
        Some(tokio::spawn(async move {
            run_webhook_server(quorum, health, &cert_dir, port).await
        }))
    } else {
        info!("Webhook certificates not found, webhook server disabled");
        None
    };

    // Wait for a fatal task exit or the shutdown signal
    tokio::select! {
        result = health_handle => {
            match result {
                Ok(Err(e)) => {
                    error!(error = %e, "Health server failed");
                    return Err(e.into());
                }
                Err(e) => error!(error = %e, "Health server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        result = async {
            match webhook_handle {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            match result {
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => error!(error = %e, "Webhook server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown");
            health_state.set_ready_check(DISPATCHER_CHECK, false).await;
        }
    }

    // Flip the shutdown watch; in-flight reconciles drain, everything else
    // stops pulling new work.
    shutdown_tx.send_replace(true);
    let _ = dispatcher_handle.await;
    let _ = election_handle.await;
    let _ = tracker_handle.await;
    let _ = watch_handle.await;
    let _ = resync_handle.await;

    info!("Operator stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the operator cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
