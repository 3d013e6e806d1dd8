//! Node listing in downstream clusters.
//!
//! A provisioned cluster's admin kubeconfig is stored by the cluster
//! provisioner in the secret `<cluster>-kubeconfig`, key `value`. Clients
//! built from it are kept per cluster until the secret's resource version
//! changes or a list through them fails.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::debug;

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::NodeLister;

/// Data key of the downstream kubeconfig
pub const KUBECONFIG_SECRET_KEY: &str = "value";

#[must_use]
pub fn kubeconfig_secret_name(cluster_name: &str) -> String {
    format!("{cluster_name}-kubeconfig")
}

type ClusterKey = (String, String);

/// Values keyed by `(namespace, cluster)`, each tagged with the resource
/// version of the secret it was built from
#[derive(Debug)]
struct VersionedCache<T> {
    entries: RwLock<HashMap<ClusterKey, (Option<String>, T)>>,
}

impl<T> Default for VersionedCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> VersionedCache<T> {
    /// The cached value, if it was built from `version`
    fn get(&self, namespace: &str, cluster_name: &str, version: Option<&str>) -> Option<T> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(namespace.to_string(), cluster_name.to_string()))
            .filter(|(built_from, _)| built_from.as_deref() == version)
            .map(|(_, value)| value.clone())
    }

    fn insert(&self, namespace: &str, cluster_name: &str, version: Option<String>, value: T) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((namespace.to_string(), cluster_name.to_string()), (version, value));
    }

    fn invalidate(&self, namespace: &str, cluster_name: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(namespace.to_string(), cluster_name.to_string()));
    }
}

/// Lists Nodes through the downstream cluster's kubeconfig secret
#[derive(Clone)]
pub struct DownstreamNodeLister {
    client: Client,
    downstream: Arc<VersionedCache<Client>>,
}

impl std::fmt::Debug for DownstreamNodeLister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownstreamNodeLister").finish_non_exhaustive()
    }
}

impl DownstreamNodeLister {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            downstream: Arc::new(VersionedCache::default()),
        }
    }

    async fn downstream_client(&self, namespace: &str, cluster_name: &str) -> Result<Client, StoreError> {
        let name = kubeconfig_secret_name(cluster_name);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get(&name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", namespace, &name))?;

        let version = secret.metadata.resource_version.clone();
        if let Some(client) = self.downstream.get(namespace, cluster_name, version.as_deref()) {
            return Ok(client);
        }

        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| StoreError::InvalidObject(format!("secret {namespace}/{name} has no {KUBECONFIG_SECRET_KEY} key")))?;
        let text = std::str::from_utf8(&raw.0)
            .map_err(|e| StoreError::InvalidObject(format!("invalid kubeconfig UTF-8 in {namespace}/{name}: {e}")))?;
        let kubeconfig: Kubeconfig = serde_yaml::from_str(text)
            .map_err(|e| StoreError::InvalidObject(format!("invalid kubeconfig YAML in {namespace}/{name}: {e}")))?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| StoreError::Downstream(format!("failed to build config for cluster {cluster_name}: {e}")))?;
        let client = Client::try_from(config).map_err(StoreError::Kube)?;
        debug!("Built client for cluster {}/{}", namespace, cluster_name);
        self.downstream.insert(namespace, cluster_name, version, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl NodeLister for DownstreamNodeLister {
    async fn list_nodes(
        &self,
        namespace: &str,
        cluster_name: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Node>, StoreError> {
        let client = self.downstream_client(namespace, cluster_name).await?;
        let nodes: Api<Node> = Api::all(client);
        let list = match nodes.list(&ListParams::default().labels(&selector.to_query())).await {
            Ok(list) => list,
            Err(e) => {
                self.downstream.invalidate(namespace, cluster_name);
                return Err(StoreError::Downstream(format!(
                    "failed to list nodes in cluster {cluster_name}: {e}"
                )));
            }
        };
        debug!(
            "Found {} nodes in cluster {}/{} matching {}",
            list.items.len(),
            namespace,
            cluster_name,
            selector
        );
        Ok(list.items)
    }
}
