//! Process configuration.
//!
//! All tunables are exposed as command-line flags. Durations accept
//! human-readable values such as `40s` or `10m`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// controlplane-operator - manages ControlPlane resources across remote workload clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "controlplane-operator", version, about, long_about = None)]
pub struct Options {
    /// The address the metrics endpoint binds to. The endpoint itself is
    /// served by a sidecar; this process only records the address.
    #[arg(long, default_value = "localhost:8080")]
    pub metrics_bind_addr: String,

    /// Enable leader election. Ensures only one replica dispatches
    /// reconciliation work at a time.
    #[arg(long)]
    pub leader_elect: bool,

    /// Validity window of the leader election lease
    #[arg(long, default_value = "1m", value_parser = parse_duration)]
    pub leader_elect_lease_duration: Duration,

    /// How long the leader retries failed renewals before surrendering
    /// leadership
    #[arg(long, default_value = "40s", value_parser = parse_duration)]
    pub leader_elect_renew_deadline: Duration,

    /// Interval between lease acquisition / renewal attempts
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub leader_elect_retry_period: Duration,

    /// Namespace to watch for ControlPlane objects. Unset means all
    /// namespaces.
    #[arg(long)]
    pub namespace: Option<String>,

    /// Label value the operator watches for. Only objects labeled
    /// `controlplane.example.com/watch-filter=<value>` are reconciled.
    #[arg(long)]
    pub watch_filter: Option<String>,

    /// Number of ControlPlane objects to reconcile simultaneously
    #[arg(long, default_value_t = 10)]
    pub controlplane_concurrency: usize,

    /// Minimum interval at which watched objects are re-reconciled
    #[arg(long, default_value = "10m", value_parser = parse_duration)]
    pub sync_period: Duration,

    /// Admission webhook server port
    #[arg(long, default_value_t = 9443)]
    pub webhook_port: u16,

    /// Directory holding the webhook serving certificate (tls.crt / tls.key)
    #[arg(long, default_value = "/etc/webhook/certs")]
    pub webhook_cert_dir: PathBuf,

    /// The address the health probe endpoint binds to
    #[arg(long, default_value = "0.0.0.0:9440")]
    pub health_addr: SocketAddr,

    /// Maximum time to wait when dialing a remote cluster's API server
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub remote_dial_timeout: Duration,
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}
