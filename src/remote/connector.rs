//! Remote cluster connectivity.
//!
//! The `Connector` trait is the boundary to remote clusters: establish a
//! client handle, probe its health, and list the cluster's nodes. The
//! production implementation builds a `kube::Client` from the workload
//! cluster's kubeconfig Secret.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

use crate::dispatch::ObjectKey;
use crate::error::{Error, Result};

/// Key inside the kubeconfig Secret holding the serialized kubeconfig.
const KUBECONFIG_SECRET_KEY: &str = "value";

/// A node observed on a remote cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteNode {
    pub name: String,
    /// Cloud provider instance ID, when set by the node's kubelet.
    pub provider_id: Option<String>,
    pub ready: bool,
}

/// External capability set for reaching remote clusters.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Live client handle for one remote cluster.
    type Handle: Clone + Send + Sync + 'static;

    /// Establish a connection to the cluster identified by `cluster`.
    async fn connect(&self, cluster: &ObjectKey) -> Result<Self::Handle>;

    /// Probe whether the handle still reaches a responsive API server.
    async fn health_check(&self, handle: &Self::Handle) -> bool;

    /// List the cluster's nodes (used to maintain the node index).
    async fn list_nodes(&self, handle: &Self::Handle) -> Result<Vec<RemoteNode>>;
}

/// Connector that reads `<cluster>-kubeconfig` Secrets from the management
/// cluster and dials the workload cluster's API server.
pub struct KubeConnector {
    client: Client,
    dial_timeout: Duration,
}

impl KubeConnector {
    pub fn new(client: Client, dial_timeout: Duration) -> Self {
        Self {
            client,
            dial_timeout,
        }
    }

    async fn load_kubeconfig(&self, cluster: &ObjectKey) -> Result<Kubeconfig> {
        let namespace = cluster
            .namespace
            .as_deref()
            .ok_or_else(|| Error::MissingField(format!("cluster {cluster} has no namespace")))?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret_name = format!("{}-kubeconfig", cluster.name);
        let secret = secrets
            .get(&secret_name)
            .await
            .map_err(|e| Error::RemoteConnect {
                cluster: cluster.to_string(),
                message: format!("reading Secret {secret_name}: {e}"),
            })?;

        let data = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| Error::RemoteConnect {
                cluster: cluster.to_string(),
                message: format!("Secret {secret_name} has no '{KUBECONFIG_SECRET_KEY}' key"),
            })?;

        let text = std::str::from_utf8(&data.0).map_err(|e| Error::RemoteConnect {
            cluster: cluster.to_string(),
            message: format!("kubeconfig is not valid UTF-8: {e}"),
        })?;

        Kubeconfig::from_yaml(text).map_err(|e| Error::RemoteConnect {
            cluster: cluster.to_string(),
            message: format!("parsing kubeconfig: {e}"),
        })
    }
}

#[async_trait]
impl Connector for KubeConnector {
    type Handle = Client;

    async fn connect(&self, cluster: &ObjectKey) -> Result<Client> {
        let kubeconfig = self.load_kubeconfig(cluster).await?;
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::RemoteConnect {
                cluster: cluster.to_string(),
                message: format!("building client config: {e}"),
            })?;
        config.connect_timeout = Some(self.dial_timeout);

        let client = Client::try_from(config).map_err(|e| Error::RemoteConnect {
            cluster: cluster.to_string(),
            message: format!("constructing client: {e}"),
        })?;

        // Verify the API server answers before handing the client out.
        client
            .apiserver_version()
            .await
            .map_err(|e| Error::RemoteConnect {
                cluster: cluster.to_string(),
                message: format!("API server unreachable: {e}"),
            })?;

        debug!(cluster = %cluster, "Connected to remote cluster");
        Ok(client)
    }

    async fn health_check(&self, handle: &Client) -> bool {
        handle.apiserver_version().await.is_ok()
    }

    async fn list_nodes(&self, handle: &Client) -> Result<Vec<RemoteNode>> {
        let nodes: Api<k8s_openapi::api::core::v1::Node> = Api::all(handle.clone());
        let list = nodes.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|node| {
                let ready = node
                    .status
                    .as_ref()
                    .and_then(|s| s.conditions.as_ref())
                    .map(|conds| {
                        conds
                            .iter()
                            .any(|c| c.type_ == "Ready" && c.status == "True")
                    })
                    .unwrap_or(false);
                RemoteNode {
                    name: node.metadata.name.clone().unwrap_or_default(),
                    provider_id: node.spec.as_ref().and_then(|s| s.provider_id.clone()),
                    ready,
                }
            })
            .collect())
    }
}
