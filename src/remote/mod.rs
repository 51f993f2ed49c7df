//! Remote cluster connection cache.
//!
//! The tracker owns one live connection per workload cluster, created
//! lazily on first use and single-flighted so concurrent callers never dial
//! the same cluster twice. Each connection carries a node index maintained
//! by the background health loop; evicting a connection drops its indexes
//! in the same swap, so readers never see one without the other.

pub mod connector;

pub use connector::{Connector, KubeConnector, RemoteNode};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatch::ObjectKey;
use crate::error::{Error, Result};

/// Consecutive health-check failures before a connection is evicted.
const MAX_HEALTH_FAILURES: u32 = 3;

/// A live connection to one remote cluster, bundled with its node index.
#[derive(Debug)]
pub struct RemoteConnection<H> {
    pub handle: H,
    index: RwLock<Option<NodeIndex>>,
}

#[derive(Debug)]
struct NodeIndex {
    nodes: Vec<RemoteNode>,
    by_provider_id: HashMap<String, usize>,
}

impl NodeIndex {
    fn build(nodes: Vec<RemoteNode>) -> Self {
        let by_provider_id = nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.provider_id.clone().map(|id| (id, i)))
            .collect();
        Self {
            nodes,
            by_provider_id,
        }
    }
}

impl<H> RemoteConnection<H> {
    fn new(handle: H, nodes: Option<Vec<RemoteNode>>) -> Self {
        Self {
            handle,
            index: RwLock::new(nodes.map(NodeIndex::build)),
        }
    }

    /// Whether the node index has been populated.
    pub fn index_warm(&self) -> bool {
        #[allow(clippy::expect_used)]
        self.index.read().expect("index lock poisoned").is_some()
    }

    /// All indexed nodes, without a remote round-trip. `None` if cold.
    pub fn nodes(&self) -> Option<Vec<RemoteNode>> {
        #[allow(clippy::expect_used)]
        let index = self.index.read().expect("index lock poisoned");
        index.as_ref().map(|i| i.nodes.clone())
    }

    /// Indexed lookup of a node by provider ID. `None` if cold or absent.
    pub fn node_by_provider_id(&self, provider_id: &str) -> Option<RemoteNode> {
        #[allow(clippy::expect_used)]
        let index = self.index.read().expect("index lock poisoned");
        index.as_ref().and_then(|i| {
            i.by_provider_id
                .get(provider_id)
                .and_then(|&pos| i.nodes.get(pos).cloned())
        })
    }

    fn update_nodes(&self, nodes: Vec<RemoteNode>) {
        #[allow(clippy::expect_used)]
        let mut index = self.index.write().expect("index lock poisoned");
        *index = Some(NodeIndex::build(nodes));
    }
}

struct Slot<H> {
    connection: Option<Arc<RemoteConnection<H>>>,
    /// Consecutive health-check failures since the last success.
    failures: u32,
    /// Error from the most recent connection attempt, tagged with the
    /// flight epoch it belongs to.
    last_error: Option<(u64, String)>,
}

struct SlotEntry<H> {
    gate: tokio::sync::Mutex<Slot<H>>,
    /// Incremented after every completed connection attempt. Callers that
    /// observed an older epoch before blocking on the gate share the
    /// attempt's outcome instead of dialing again.
    flight: AtomicU64,
}

impl<H> SlotEntry<H> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: tokio::sync::Mutex::new(Slot {
                connection: None,
                failures: 0,
                last_error: None,
            }),
            flight: AtomicU64::new(0),
        })
    }
}

/// Cache of remote cluster connections, keyed by cluster identity.
pub struct ClusterTracker<C: Connector> {
    connector: C,
    health_interval: Duration,
    slots: Mutex<HashMap<ObjectKey, Arc<SlotEntry<C::Handle>>>>,
}

impl<C: Connector> ClusterTracker<C> {
    pub fn new(connector: C, health_interval: Duration) -> Self {
        Self {
            connector,
            health_interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot_for(&self, cluster: &ObjectKey) -> Arc<SlotEntry<C::Handle>> {
        #[allow(clippy::expect_used)]
        let mut slots = self.slots.lock().expect("tracker lock poisoned");
        slots
            .entry(cluster.clone())
            .or_insert_with(SlotEntry::new)
            .clone()
    }

    /// Get the cached connection for a cluster, dialing if necessary.
    ///
    /// Creation is single-flighted: concurrent callers for the same cluster
    /// block on the first caller's attempt and share its connection or its
    /// error.
    pub async fn get_connection(&self, cluster: &ObjectKey) -> Result<Arc<RemoteConnection<C::Handle>>> {
        let entry = self.slot_for(cluster);
        let observed_epoch = entry.flight.load(Ordering::Acquire);

        let mut slot = entry.gate.lock().await;
        if let Some(conn) = &slot.connection {
            return Ok(conn.clone());
        }
        // A flight completed with an error while this caller waited on the
        // gate: share that error rather than dialing again.
        if let Some((epoch, message)) = &slot.last_error
            && *epoch > observed_epoch
        {
            return Err(Error::RemoteConnect {
                cluster: cluster.to_string(),
                message: message.clone(),
            });
        }

        let result = self.connector.connect(cluster).await;
        entry.flight.fetch_add(1, Ordering::AcqRel);
        let epoch = entry.flight.load(Ordering::Acquire);

        match result {
            Ok(handle) => {
                // Warm the node index while still holding the gate so the
                // connection and its indexes appear together.
                let nodes = self.connector.list_nodes(&handle).await.ok();
                let conn = Arc::new(RemoteConnection::new(handle, nodes));
                slot.connection = Some(conn.clone());
                slot.failures = 0;
                slot.last_error = None;
                info!(cluster = %cluster, "Remote cluster connection established");
                Ok(conn)
            }
            Err(err) => {
                let message = err.to_string();
                slot.last_error = Some((epoch, message.clone()));
                Err(Error::RemoteConnect {
                    cluster: cluster.to_string(),
                    message,
                })
            }
        }
    }

    /// All indexed nodes for a cluster's warm index, fetching once if cold.
    pub async fn nodes(&self, cluster: &ObjectKey) -> Result<Vec<RemoteNode>> {
        let conn = self.connected(cluster).await?;
        if let Some(nodes) = conn.nodes() {
            return Ok(nodes);
        }
        // Cold index: one fetch, then serve from the index.
        let nodes = self.connector.list_nodes(&conn.handle).await?;
        conn.update_nodes(nodes.clone());
        Ok(nodes)
    }

    /// Indexed node lookup by provider ID, served from the warm index.
    pub async fn node_by_provider_id(
        &self,
        cluster: &ObjectKey,
        provider_id: &str,
    ) -> Result<Option<RemoteNode>> {
        let conn = self.connected(cluster).await?;
        if !conn.index_warm() {
            let nodes = self.connector.list_nodes(&conn.handle).await?;
            conn.update_nodes(nodes);
        }
        Ok(conn.node_by_provider_id(provider_id))
    }

    /// The existing connection, without attempting to dial.
    async fn connected(&self, cluster: &ObjectKey) -> Result<Arc<RemoteConnection<C::Handle>>> {
        let entry = {
            #[allow(clippy::expect_used)]
            let slots = self.slots.lock().expect("tracker lock poisoned");
            slots.get(cluster).cloned()
        };
        let entry = entry.ok_or_else(|| Error::ClusterNotConnected {
            cluster: cluster.to_string(),
        })?;
        let slot = entry.gate.lock().await;
        slot.connection
            .clone()
            .ok_or_else(|| Error::ClusterNotConnected {
                cluster: cluster.to_string(),
            })
    }

    /// Drop a cluster's connection and all of its indexes. Called when the
    /// owning resource is deleted.
    pub fn remove(&self, cluster: &ObjectKey) {
        #[allow(clippy::expect_used)]
        let removed = {
            let mut slots = self.slots.lock().expect("tracker lock poisoned");
            slots.remove(cluster).is_some()
        };
        if removed {
            info!(cluster = %cluster, "Removed remote cluster from tracker");
        }
    }

    /// Clusters currently tracked (connected or pending).
    pub fn tracked(&self) -> Vec<ObjectKey> {
        #[allow(clippy::expect_used)]
        let slots = self.slots.lock().expect("tracker lock poisoned");
        slots.keys().cloned().collect()
    }

    /// Background health-check loop, independent of request traffic.
    ///
    /// A passing check refreshes the node index and resets the failure
    /// count; three consecutive failures evict the connection (and with it
    /// all indexes) until the next `get_connection` re-dials.
    pub async fn run_health_checks(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait_for(|stop| *stop) => return,
            }

            let entries: Vec<(ObjectKey, Arc<SlotEntry<C::Handle>>)> = {
                #[allow(clippy::expect_used)]
                let slots = self.slots.lock().expect("tracker lock poisoned");
                slots.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            };

            for (cluster, entry) in entries {
                // Skip clusters with a dial in progress.
                let Ok(mut slot) = entry.gate.try_lock() else {
                    continue;
                };
                let Some(conn) = slot.connection.clone() else {
                    continue;
                };

                if self.connector.health_check(&conn.handle).await {
                    slot.failures = 0;
                    match self.connector.list_nodes(&conn.handle).await {
                        Ok(nodes) => conn.update_nodes(nodes),
                        Err(err) => {
                            debug!(cluster = %cluster, error = %err, "Node index refresh failed");
                        }
                    }
                } else {
                    slot.failures += 1;
                    if slot.failures >= MAX_HEALTH_FAILURES {
                        warn!(
                            cluster = %cluster,
                            failures = slot.failures,
                            "Health check budget exhausted, evicting connection"
                        );
                        slot.connection = None;
                        slot.failures = 0;
                    } else {
                        debug!(
                            cluster = %cluster,
                            failures = slot.failures,
                            "Remote cluster health check failed"
                        );
                    }
                }
            }
        }
    }
}
