//! Object store traits for mocking
//!
//! The plan delivery server and the node identity reconciler only talk to the
//! cluster through these traits. [`crate::KubeClusterStore`] and
//! [`crate::DownstreamNodeLister`] implement them against the Kubernetes API;
//! the `test-util` feature provides in-memory implementations.

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::watch::Watch;
use crds::{Machine, ObjectReference, RKEBootstrap};
use k8s_openapi::api::core::v1::{Node, Secret, ServiceAccount};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};

/// Cached and direct access to the objects involved in plan delivery.
///
/// Reads of Secrets, ServiceAccounts and RKEBootstraps are served from caches;
/// Machines are always read from the API server because the machine-ID label
/// write needs a fresh resource version.
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    /// Names of the caches that have not finished their initial list
    fn unsynced_caches(&self) -> Vec<&'static str>;

    /// Ask a cache to relist from scratch
    fn resync(&self, cache: &str);

    /// Token secrets whose `data.token` equals `token`
    async fn secrets_by_token(&self, token: &str) -> Result<Vec<Secret>, StoreError>;

    /// A service account token secret by name, from the cache
    async fn get_token_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// A service account token secret by name, read from the API server.
    ///
    /// Used when the cache has not caught up with a secret created together
    /// with its account.
    async fn fetch_token_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError>;

    /// Watch service account token secrets in a namespace.
    ///
    /// Existing secrets are delivered first as `Added` events.
    async fn watch_token_secrets(&self, namespace: &str) -> Result<Watch<Secret>, StoreError>;

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, StoreError>;

    async fn list_service_accounts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ServiceAccount>, StoreError>;

    /// Watch service accounts matching `selector`.
    ///
    /// Existing accounts are delivered first as `Added` events.
    async fn watch_service_accounts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Watch<ServiceAccount>, StoreError>;

    async fn get_bootstrap(&self, namespace: &str, name: &str) -> Result<RKEBootstrap, StoreError>;

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError>;

    /// Replace a machine. Fails with [`StoreError::Conflict`] when the
    /// resource version is stale.
    async fn update_machine(&self, machine: &Machine) -> Result<Machine, StoreError>;
}

/// Group/version/kind of an object only known at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindDescriptor {
    pub api_version: String,
    pub kind: String,
}

impl KindDescriptor {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
        }
    }

    #[must_use]
    pub fn from_reference(reference: &ObjectReference) -> Self {
        Self::new(reference.api_version.clone(), reference.kind.clone())
    }

    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        };
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }
}

impl std::fmt::Display for KindDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version, self.kind)
    }
}

/// Kind-dynamic object access for provider infrastructure machines
#[async_trait::async_trait]
pub trait DynamicStore: Send + Sync {
    async fn get(&self, kind: &KindDescriptor, namespace: &str, name: &str) -> Result<DynamicObject, StoreError>;

    /// Write the object's `status`. The object's resource version is honored.
    async fn update_status(&self, kind: &KindDescriptor, object: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replace the object (everything but status)
    async fn update(&self, kind: &KindDescriptor, object: &DynamicObject) -> Result<DynamicObject, StoreError>;
}

/// Lists Nodes inside a provisioned (downstream) cluster
#[async_trait::async_trait]
pub trait NodeLister: Send + Sync {
    /// Nodes of cluster `cluster_name` (whose kubeconfig secret lives in
    /// `namespace`) matching `selector`
    async fn list_nodes(
        &self,
        namespace: &str,
        cluster_name: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Node>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_descriptor_gvk() {
        let kind = KindDescriptor::new("infrastructure.cluster.x-k8s.io/v1beta1", "Metal3Machine");
        let gvk = kind.gvk();
        assert_eq!(gvk.group, "infrastructure.cluster.x-k8s.io");
        assert_eq!(gvk.version, "v1beta1");
        assert_eq!(gvk.kind, "Metal3Machine");

        let core = KindDescriptor::new("v1", "ConfigMap").gvk();
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
    }

    #[test]
    fn test_kind_descriptor_from_reference() {
        let reference = ObjectReference::new("infrastructure.cluster.x-k8s.io/v1beta1", "DockerMachine", "m1-infra");
        let kind = KindDescriptor::from_reference(&reference);
        assert_eq!(kind.kind, "DockerMachine");
        assert_eq!(kind.api_resource().plural, "dockermachines");
    }
}
