//! Concurrency-bounded dispatcher.
//!
//! Each registered controller gets its own deduplicating work queue and a
//! fixed pool of worker tasks. Workers only pull work while this replica
//! holds leadership; losing the lease freezes every queue (items accumulate
//! but are not executed) until leadership is re-acquired.

pub mod queue;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use queue::WorkQueue;

/// Initial re-enqueue delay after a reconcile error.
const BACKOFF_BASE: Duration = Duration::from_millis(500);
/// Ceiling for error backoff delays.
const BACKOFF_MAX: Duration = Duration::from_secs(300);

/// Identity of a watched object (namespace/name).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster_scoped(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Outcome of a successful reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Action {
    pub requeue_after: Option<Duration>,
}

impl Action {
    /// Reconcile again after the given delay.
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    /// Do nothing until the next watch event for this object.
    pub fn await_change() -> Self {
        Self {
            requeue_after: None,
        }
    }
}

/// A registered controller's reconcile capability.
///
/// Implementations bring the object's desired state closer to reality for a
/// single identity, idempotently. Errors are re-enqueued with backoff by the
/// dispatcher; they never terminate the process.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: ObjectKey) -> Result<Action>;
}

struct ControllerState {
    name: String,
    concurrency: usize,
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue>,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl ControllerState {
    /// Compute the next error backoff delay for a key: doubling from the
    /// base, capped at the ceiling.
    fn next_backoff(&self, key: &ObjectKey) -> Duration {
        #[allow(clippy::expect_used)]
        let mut failures = self.failures.lock().expect("backoff lock poisoned");
        let count = failures.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        backoff_for(*count)
    }

    fn reset_backoff(&self, key: &ObjectKey) {
        #[allow(clippy::expect_used)]
        let mut failures = self.failures.lock().expect("backoff lock poisoned");
        failures.remove(key);
    }
}

fn backoff_for(failure_count: u32) -> Duration {
    let exp = failure_count.saturating_sub(1).min(16);
    let delay = BACKOFF_BASE.saturating_mul(1u32 << exp);
    delay.min(BACKOFF_MAX)
}

/// Dispatches queued reconcile requests to registered controllers, bounded
/// by each controller's concurrency limit and gated on leadership.
pub struct Dispatcher {
    controllers: HashMap<String, Arc<ControllerState>>,
    leader_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    /// Create a dispatcher gated on the given leadership signal.
    pub fn new(leader_rx: watch::Receiver<bool>) -> Self {
        Self {
            controllers: HashMap::new(),
            leader_rx,
        }
    }

    /// Register a controller with a fixed number of concurrent reconcile
    /// slots. Registering the same name twice is a startup error.
    pub fn register(
        &mut self,
        name: &str,
        concurrency: usize,
        reconciler: Arc<dyn Reconciler>,
    ) -> Result<()> {
        if self.controllers.contains_key(name) {
            return Err(Error::DuplicateController(name.to_string()));
        }
        self.controllers.insert(
            name.to_string(),
            Arc::new(ControllerState {
                name: name.to_string(),
                concurrency: concurrency.max(1),
                reconciler,
                queue: Arc::new(WorkQueue::new()),
                failures: Mutex::new(HashMap::new()),
            }),
        );
        info!(controller = %name, concurrency, "Registered controller");
        Ok(())
    }

    /// Queue a reconcile request for a controller, eligible after the
    /// optional delay. Duplicate identities coalesce.
    pub fn enqueue(&self, controller: &str, key: ObjectKey, after: Option<Duration>) -> Result<()> {
        let state = self
            .controllers
            .get(controller)
            .ok_or_else(|| Error::UnknownController(controller.to_string()))?;
        state.queue.enqueue(key, after);
        Ok(())
    }

    /// Pending queue depth for a controller (test and introspection hook).
    pub fn pending_len(&self, controller: &str) -> usize {
        self.controllers
            .get(controller)
            .map(|s| s.queue.pending_len())
            .unwrap_or(0)
    }

    /// Run all worker pools until shutdown. In-flight reconciles finish;
    /// nothing new is dispatched once the shutdown signal flips.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut workers = JoinSet::new();
        for state in self.controllers.values() {
            for slot in 0..state.concurrency {
                workers.spawn(worker_loop(
                    state.clone(),
                    slot,
                    self.leader_rx.clone(),
                    shutdown.clone(),
                ));
            }
        }

        // Freeze every queue when the shutdown signal flips so blocked
        // workers wake up and drain.
        let controllers: Vec<Arc<ControllerState>> = self.controllers.values().cloned().collect();
        let mut shutdown_rx = shutdown.clone();
        workers.spawn(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
            for state in &controllers {
                state.queue.shut_down();
            }
        });

        while workers.join_next().await.is_some() {}
        info!("Dispatcher stopped");
    }
}

async fn worker_loop(
    state: Arc<ControllerState>,
    slot: usize,
    mut leader: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(controller = %state.name, slot, "Worker started");
    loop {
        // Queues are frozen while this replica is not the leader.
        while !*leader.borrow_and_update() {
            tokio::select! {
                changed = leader.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = shutdown.wait_for(|stop| *stop) => return,
            }
        }

        let key = tokio::select! {
            // Leadership is checked first so a loss that races with an
            // enqueue never dispatches while not leading.
            biased;
            changed = leader.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
            key = state.queue.pop() => match key {
                Some(key) => key,
                // Queue shut down and drained.
                None => break,
            },
        };

        debug!(controller = %state.name, object = %key, "Reconciling");
        let requeue_after = match state.reconciler.reconcile(key.clone()).await {
            Ok(action) => {
                state.reset_backoff(&key);
                action.requeue_after
            }
            Err(err) if err.is_not_found() => {
                debug!(controller = %state.name, object = %key, "Object no longer exists");
                state.reset_backoff(&key);
                None
            }
            Err(err) => {
                let delay = state.next_backoff(&key);
                if err.is_retryable() {
                    warn!(
                        controller = %state.name,
                        object = %key,
                        error = %err,
                        retry_in = ?delay,
                        "Reconcile failed, backing off"
                    );
                } else {
                    error!(
                        controller = %state.name,
                        object = %key,
                        error = %err,
                        retry_in = ?delay,
                        "Reconcile failed"
                    );
                }
                Some(delay)
            }
        };
        state.queue.done(&key);
        if let Some(delay) = requeue_after {
            state.queue.enqueue(key, Some(delay));
        }
    }
    debug!(controller = %state.name, slot, "Worker stopped");
}
