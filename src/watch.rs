//! Event sources feeding the dispatcher.
//!
//! A watch stream over ControlPlane objects turns API server events into
//! queued reconcile requests for both controllers. A slower resync loop
//! lists everything on the sync period so drift is repaired even when no
//! watch event arrives.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::Client;
use kube::api::ListParams;
use kube::runtime::{WatchStreamExt, watcher};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::controllers::{CLUSTER_CACHE_CONTROLLER, CONTROLPLANE_CONTROLLER};
use crate::crd::ControlPlane;
use crate::dispatch::{Dispatcher, ObjectKey};
use crate::{WATCH_LABEL, scoped_api};

/// Queue reconcile requests for an observed ControlPlane on both
/// controllers: the object itself and the cluster it references.
fn enqueue_for(dispatcher: &Dispatcher, cp: &ControlPlane) {
    let Some(namespace) = cp.metadata.namespace.as_deref() else {
        return;
    };
    let Some(name) = cp.metadata.name.as_deref() else {
        return;
    };

    let object_key = ObjectKey::namespaced(namespace, name);
    let cluster_key = ObjectKey::namespaced(namespace, &cp.spec.cluster_name);
    // Registration happens before the watch starts, so these only fail on
    // a wiring bug.
    if let Err(err) = dispatcher.enqueue(CONTROLPLANE_CONTROLLER, object_key, None) {
        warn!(error = %err, "Failed to enqueue ControlPlane reconcile");
    }
    if let Err(err) = dispatcher.enqueue(CLUSTER_CACHE_CONTROLLER, cluster_key, None) {
        warn!(error = %err, "Failed to enqueue cluster cache reconcile");
    }
}

/// Label selector matching the `--watch-filter` flag, if set.
fn filter_selector(watch_filter: Option<&str>) -> Option<String> {
    watch_filter.map(|value| format!("{WATCH_LABEL}={value}"))
}

/// Build the watcher config from the namespace and label filters.
fn watch_config(watch_filter: Option<&str>) -> watcher::Config {
    let mut config = watcher::Config::default().any_semantic();
    if let Some(selector) = filter_selector(watch_filter) {
        config = config.labels(&selector);
    }
    config
}

/// List params scoped by the same label selector as the watch stream.
fn list_params(watch_filter: Option<&str>) -> ListParams {
    match filter_selector(watch_filter) {
        Some(selector) => ListParams::default().labels(&selector),
        None => ListParams::default(),
    }
}

/// Stream ControlPlane watch events into the dispatcher until shutdown.
pub async fn run_watch(
    client: Client,
    dispatcher: Arc<Dispatcher>,
    namespace: Option<&str>,
    watch_filter: Option<&str>,
    mut shutdown: watch::Receiver<bool>,
) {
    let api = scoped_api::<ControlPlane>(client, namespace);
    let stream = watcher(api, watch_config(watch_filter)).default_backoff();
    tokio::pin!(stream);

    info!(
        namespace = ?namespace,
        watch_filter = ?watch_filter,
        "Watching ControlPlane objects"
    );

    loop {
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => {
                debug!("Watch stream stopping");
                return;
            }
            event = stream.next() => {
                match event {
                    Some(Ok(watcher::Event::Apply(cp) | watcher::Event::InitApply(cp))) => {
                        enqueue_for(&dispatcher, &cp);
                    }
                    Some(Ok(watcher::Event::Delete(cp))) => {
                        // The cluster cache controller decides whether the
                        // cluster's connection can be dropped.
                        enqueue_for(&dispatcher, &cp);
                    }
                    Some(Ok(watcher::Event::Init | watcher::Event::InitDone)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "Watch stream error, backing off");
                    }
                    None => {
                        warn!("Watch stream ended");
                        return;
                    }
                }
            }
        }
    }
}

/// Periodically list all ControlPlane objects and re-enqueue them.
pub async fn run_resync(
    client: Client,
    dispatcher: Arc<Dispatcher>,
    namespace: Option<&str>,
    watch_filter: Option<&str>,
    sync_period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let api = scoped_api::<ControlPlane>(client, namespace);
    let params = list_params(watch_filter);
    let mut ticker = tokio::time::interval(sync_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the watch's initial list already
    // covers startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => return,
            _ = ticker.tick() => {
                match api.list(&params).await {
                    Ok(list) => {
                        debug!(count = list.items.len(), "Resync enqueue");
                        for cp in &list.items {
                            enqueue_for(&dispatcher, cp);
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Resync list failed, retrying next period");
                    }
                }
            }
        }
    }
}
