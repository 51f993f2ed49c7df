//! Leadership gating across the election loop and the dispatcher.
//!
//! Wires a scripted lease store into the real election loop and checks
//! that queued work is dispatched exactly while this replica leads.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::watch;

use controlplane_operator::dispatch::{Dispatcher, ObjectKey};
use controlplane_operator::error::Error;
use controlplane_operator::leader::LeaderElection;

use crate::mocks::{CountingReconciler, ScriptedLease};

const CONTROLLER: &str = "probe";

fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced("default", name)
}

fn election(script: Vec<controlplane_operator::Result<bool>>) -> LeaderElection {
    LeaderElection::new(
        Arc::new(ScriptedLease::new(script)),
        Duration::from_secs(40),
        Duration::from_millis(10),
    )
}

#[tokio::test]
async fn test_no_dispatch_before_leadership() {
    // The lease store always answers "someone else holds it".
    let election = election(vec![Ok(false)]);
    let reconciler = Arc::new(CountingReconciler::new());

    let mut dispatcher = Dispatcher::new(election.subscribe());
    dispatcher
        .register(CONTROLLER, 2, reconciler.clone())
        .unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (stop_tx, stop_rx) = watch::channel(false);
    let election_handle = tokio::spawn(election.run(stop_rx.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    for i in 0..5 {
        dispatcher
            .enqueue(CONTROLLER, key(&format!("cp-{i}")), None)
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        reconciler.calls.load(Ordering::SeqCst),
        0,
        "work must not be dispatched without leadership"
    );
    assert_eq!(dispatcher.pending_len(CONTROLLER), 5, "items accumulate");

    stop_tx.send_replace(true);
    election_handle.await.unwrap();
    dispatcher_handle.await.unwrap();
}

#[tokio::test]
async fn test_dispatch_starts_on_acquisition() {
    // Lost a few rounds, then wins the lease.
    let election = election(vec![Ok(false), Ok(false), Ok(true)]);
    let leader_rx = election.subscribe();
    let reconciler = Arc::new(CountingReconciler::new());

    let mut dispatcher = Dispatcher::new(leader_rx);
    dispatcher
        .register(CONTROLLER, 2, reconciler.clone())
        .unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (stop_tx, stop_rx) = watch::channel(false);
    let election_handle = tokio::spawn(election.run(stop_rx.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    for i in 0..3 {
        dispatcher
            .enqueue(CONTROLLER, key(&format!("cp-{i}")), None)
            .unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while reconciler.calls.load(Ordering::SeqCst) < 3 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "queued work was never dispatched after acquiring leadership"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stop_tx.send_replace(true);
    election_handle.await.unwrap();
    dispatcher_handle.await.unwrap();
}

#[tokio::test]
async fn test_leadership_loss_freezes_dispatch() {
    // Win, hold for two renewals, then lose to another replica.
    let election = election(vec![Ok(true), Ok(true), Ok(false)]);
    let mut leader_rx = election.subscribe();
    let reconciler = Arc::new(CountingReconciler::new());

    let mut dispatcher = Dispatcher::new(election.subscribe());
    dispatcher
        .register(CONTROLLER, 1, reconciler.clone())
        .unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (stop_tx, stop_rx) = watch::channel(false);
    let election_handle = tokio::spawn(election.run(stop_rx.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    leader_rx.wait_for(|leading| *leading).await.unwrap();
    dispatcher.enqueue(CONTROLLER, key("early"), None).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while reconciler.calls.load(Ordering::SeqCst) < 1 {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    leader_rx.wait_for(|leading| !*leading).await.unwrap();
    dispatcher.enqueue(CONTROLLER, key("late"), None).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(
        reconciler.calls.load(Ordering::SeqCst),
        1,
        "queues must freeze after leadership is lost"
    );
    assert_eq!(dispatcher.pending_len(CONTROLLER), 1);

    stop_tx.send_replace(true);
    election_handle.await.unwrap();
    dispatcher_handle.await.unwrap();
}

#[tokio::test]
async fn test_renewal_errors_within_deadline_keep_dispatching() {
    let flaky = || Err(Error::LeaderElection("lease store unreachable".to_string()));
    let election = election(vec![Ok(true), flaky(), flaky(), Ok(true)]);
    let mut leader_rx = election.subscribe();
    let reconciler = Arc::new(CountingReconciler::new());

    let mut dispatcher = Dispatcher::new(election.subscribe());
    dispatcher
        .register(CONTROLLER, 1, reconciler.clone())
        .unwrap();
    let dispatcher = Arc::new(dispatcher);

    let (stop_tx, stop_rx) = watch::channel(false);
    let election_handle = tokio::spawn(election.run(stop_rx.clone()));
    let dispatcher_handle = tokio::spawn(dispatcher.clone().run(stop_rx));

    leader_rx.wait_for(|leading| *leading).await.unwrap();
    // Let the flaky renewals happen, then enqueue.
    tokio::time::sleep(Duration::from_millis(100)).await;
    dispatcher.enqueue(CONTROLLER, key("steady"), None).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while reconciler.calls.load(Ordering::SeqCst) < 1 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "transient renewal errors within the deadline must not stop dispatch"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    stop_tx.send_replace(true);
    election_handle.await.unwrap();
    dispatcher_handle.await.unwrap();
}
