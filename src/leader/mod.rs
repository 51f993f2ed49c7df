//! Lease-based leader election.
//!
//! One replica at a time holds a renewable Lease; only the holder dispatches
//! reconciliation work. Leadership state is published over a watch channel
//! that the dispatcher's workers gate on. Losing the lease is not fatal:
//! dispatch freezes and the loop keeps trying to re-acquire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Lease name shared by all replicas of this operator.
pub const LEASE_NAME: &str = "controlplane-operator-leader";

/// The lease store a coordinator runs against.
///
/// `try_acquire_or_renew` returns true while this replica holds the lease.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    async fn try_acquire_or_renew(&self) -> Result<bool>;
}

/// Production backend over a Kubernetes Lease object.
pub struct KubeLeaseBackend {
    lock: LeaseLock,
}

impl KubeLeaseBackend {
    pub fn new(client: Client, namespace: &str, holder_id: &str, lease_duration: Duration) -> Self {
        Self {
            lock: LeaseLock::new(
                client,
                namespace,
                LeaseLockParams {
                    holder_id: holder_id.to_string(),
                    lease_name: LEASE_NAME.to_string(),
                    lease_ttl: lease_duration,
                },
            ),
        }
    }
}

#[async_trait]
impl LeaseBackend for KubeLeaseBackend {
    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let result = self
            .lock
            .try_acquire_or_renew()
            .await
            .map_err(|e| Error::LeaderElection(e.to_string()))?;
        Ok(result.acquired_lease)
    }
}

/// Leader election loop with renew-deadline semantics.
pub struct LeaderElection {
    backend: Option<Arc<dyn LeaseBackend>>,
    renew_deadline: Duration,
    retry_period: Duration,
    tx: watch::Sender<bool>,
}

impl LeaderElection {
    /// Election against a lease backend.
    pub fn new(
        backend: Arc<dyn LeaseBackend>,
        renew_deadline: Duration,
        retry_period: Duration,
    ) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            backend: Some(backend),
            renew_deadline,
            retry_period,
            tx,
        }
    }

    /// Disabled election: this replica reports itself as perpetually
    /// leading.
    pub fn always_leader() -> Self {
        let (tx, _) = watch::channel(true);
        Self {
            backend: None,
            renew_deadline: Duration::ZERO,
            retry_period: Duration::ZERO,
            tx,
        }
    }

    /// Subscribe to leadership transitions. The current value is readable
    /// immediately; changes are signaled through the channel.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Run the acquisition / renewal loop until shutdown.
    ///
    /// Transient renewal failures are retried every retry period; once the
    /// time since the last successful renewal exceeds the renew deadline,
    /// leadership is surrendered and re-acquisition continues.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Some(backend) = self.backend else {
            // Election disabled; stay leader until shutdown.
            debug!("Leader election disabled, acting as permanent leader");
            let _ = shutdown.wait_for(|stop| *stop).await;
            return;
        };

        let mut last_renew: Option<Instant> = None;
        loop {
            match backend.try_acquire_or_renew().await {
                Ok(true) => {
                    if last_renew.is_none() {
                        info!("Acquired leadership");
                        self.tx.send_replace(true);
                    }
                    last_renew = Some(Instant::now());
                }
                Ok(false) => {
                    if last_renew.take().is_some() {
                        warn!("Lost leadership to another replica, suspending dispatch");
                        self.tx.send_replace(false);
                    } else {
                        debug!("Another replica holds the lease");
                    }
                }
                Err(err) => match last_renew {
                    Some(at) if at.elapsed() >= self.renew_deadline => {
                        warn!(
                            error = %err,
                            deadline = ?self.renew_deadline,
                            "Renew deadline exceeded, surrendering leadership"
                        );
                        self.tx.send_replace(false);
                        last_renew = None;
                    }
                    Some(_) => {
                        debug!(error = %err, "Lease renewal failed, retrying");
                    }
                    None => {
                        debug!(error = %err, "Lease acquisition failed, retrying");
                    }
                },
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_period) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    if last_renew.is_some() {
                        self.tx.send_replace(false);
                    }
                    return;
                }
            }
        }
    }
}
