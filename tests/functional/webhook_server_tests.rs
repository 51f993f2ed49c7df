//! Webhook server lifecycle: the named health checks follow the TLS
//! listener, staying failed until it binds and failing again when the
//! server cannot start.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use controlplane_operator::HealthState;
use controlplane_operator::webhooks::quorum::{EtcdQuorumPolicy, QuorumPolicy};
use controlplane_operator::webhooks::server::{
    WEBHOOK_CERT_FILE, WEBHOOK_CHECK, WEBHOOK_KEY_FILE, run_webhook_server,
};

/// Write a throwaway self-signed certificate into a fresh directory and
/// return the directory path.
fn write_cert_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "controlplane-webhook-{}-{}",
        label,
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    std::fs::write(dir.join(WEBHOOK_CERT_FILE), cert.cert.pem()).unwrap();
    std::fs::write(dir.join(WEBHOOK_KEY_FILE), cert.key_pair.serialize_pem()).unwrap();
    dir
}

async fn webhook_health() -> Arc<HealthState> {
    let health = Arc::new(HealthState::new());
    health.register_ready_check(WEBHOOK_CHECK).await;
    health.register_live_check(WEBHOOK_CHECK).await;
    health
}

#[tokio::test]
async fn test_readiness_follows_listener_bind() {
    let health = webhook_health().await;
    assert!(
        !health.is_ready().await,
        "checks must fail before the listener binds"
    );
    assert!(!health.is_live().await);

    let cert_dir = write_cert_dir("bind");
    let quorum: Arc<dyn QuorumPolicy> = Arc::new(EtcdQuorumPolicy);
    let server = tokio::spawn({
        let health = health.clone();
        async move { run_webhook_server(quorum, health, &cert_dir, 0).await }
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !health.is_ready().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "listener bind never flipped the readiness check"
        );
        assert!(!server.is_finished(), "webhook server exited before binding");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(health.is_live().await);

    server.abort();
}

#[tokio::test]
async fn test_missing_tls_material_keeps_checks_failing() {
    let health = webhook_health().await;
    let empty_dir = std::env::temp_dir().join(format!(
        "controlplane-webhook-empty-{}",
        std::process::id()
    ));
    std::fs::create_dir_all(&empty_dir).unwrap();

    let quorum: Arc<dyn QuorumPolicy> = Arc::new(EtcdQuorumPolicy);
    let result = run_webhook_server(quorum, health.clone(), &empty_dir, 0).await;

    assert!(result.is_err(), "missing certificate files must fail startup");
    assert!(!health.is_ready().await);
    assert!(!health.is_live().await);
}
