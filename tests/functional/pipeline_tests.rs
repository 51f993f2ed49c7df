//! Dispatcher and remote tracker wired together.
//!
//! A reconciler reads node state through the tracker while the dispatcher
//! drives it, covering connection reuse, error backoff recovery, and the
//! warm index across reconciles.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use controlplane_operator::dispatch::{Action, Dispatcher, ObjectKey, Reconciler};
use controlplane_operator::error::Result;
use controlplane_operator::leader::LeaderElection;
use controlplane_operator::remote::ClusterTracker;

use crate::mocks::{FakeConnector, SharedConnector};

const CONTROLLER: &str = "node-count";

fn cluster(name: &str) -> ObjectKey {
    ObjectKey::namespaced("default", name)
}

/// Reconciler that records the ready node count of its cluster.
struct NodeCountReconciler {
    tracker: Arc<ClusterTracker<SharedConnector>>,
    observed: Mutex<Vec<usize>>,
}

#[async_trait]
impl Reconciler for NodeCountReconciler {
    async fn reconcile(&self, key: ObjectKey) -> Result<Action> {
        self.tracker.get_connection(&key).await?;
        let nodes = self.tracker.nodes(&key).await?;
        let ready = nodes.iter().filter(|n| n.ready).count();
        self.observed.lock().unwrap().push(ready);
        Ok(Action::await_change())
    }
}

fn harness(
    connector: Arc<FakeConnector>,
) -> (
    Arc<Dispatcher>,
    Arc<NodeCountReconciler>,
    Arc<ClusterTracker<SharedConnector>>,
) {
    let tracker = Arc::new(ClusterTracker::new(
        SharedConnector(connector),
        Duration::from_secs(3600),
    ));
    let reconciler = Arc::new(NodeCountReconciler {
        tracker: tracker.clone(),
        observed: Mutex::new(Vec::new()),
    });
    let election = LeaderElection::always_leader();
    let mut dispatcher = Dispatcher::new(election.subscribe());
    // Keep the leadership sender alive for the test's duration; dropping it
    // closes the watch channel and stops the dispatcher's workers.
    std::mem::forget(election);
    dispatcher.register(CONTROLLER, 4, reconciler.clone()).unwrap();
    (Arc::new(dispatcher), reconciler, tracker)
}

async fn wait_for_observations(reconciler: &NodeCountReconciler, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if reconciler.observed.lock().unwrap().len() >= count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "reconciles never completed"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_reconcile_reads_nodes_through_tracker() {
    let connector = Arc::new(FakeConnector::new(vec![
        FakeConnector::ready_node("cp-0"),
        FakeConnector::ready_node("cp-1"),
        FakeConnector::not_ready_node("cp-2"),
    ]));
    let (dispatcher, reconciler, _tracker) = harness(connector.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    dispatcher.enqueue(CONTROLLER, cluster("prod"), None).unwrap();
    wait_for_observations(&reconciler, 1).await;

    assert_eq!(*reconciler.observed.lock().unwrap(), vec![2]);
    assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

    stop_tx.send_replace(true);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_connection_is_shared_across_clusters_and_reconciles() {
    let connector = Arc::new(FakeConnector::new(vec![FakeConnector::ready_node("cp-0")]));
    let (dispatcher, reconciler, _tracker) = harness(connector.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    // Several reconciles of two clusters: one dial per cluster, total.
    for _ in 0..3 {
        dispatcher.enqueue(CONTROLLER, cluster("prod"), None).unwrap();
        dispatcher.enqueue(CONTROLLER, cluster("staging"), None).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    wait_for_observations(&reconciler, 6).await;

    assert_eq!(
        connector.connects.load(Ordering::SeqCst),
        2,
        "each cluster is dialed exactly once"
    );

    stop_tx.send_replace(true);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_backs_off_then_recovers() {
    let connector = Arc::new(FakeConnector::new(vec![FakeConnector::ready_node("cp-0")]));
    connector.fail_connect.store(true, Ordering::SeqCst);
    let (dispatcher, reconciler, _tracker) = harness(connector.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    dispatcher.enqueue(CONTROLLER, cluster("prod"), None).unwrap();

    // Let the first attempt fail, then heal the remote cluster. The
    // dispatcher's backoff re-enqueue retries the key.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(reconciler.observed.lock().unwrap().is_empty());
    connector.fail_connect.store(false, Ordering::SeqCst);

    wait_for_observations(&reconciler, 1).await;
    assert_eq!(*reconciler.observed.lock().unwrap(), vec![1]);

    stop_tx.send_replace(true);
    handle.await.unwrap();
}
