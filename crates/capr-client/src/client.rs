//! Kubernetes-backed object store

use std::sync::Arc;

use async_trait::async_trait;
use crds::{Machine, RKEBootstrap, SERVICE_ACCOUNT_TOKEN_TYPE};
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::{Patch, PatchParams, PostParams, WatchParams};
use kube::core::DynamicObject;
use kube::{Api, Client, Resource};
use kube_runtime::watcher;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::cache::ObjectCache;
use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::{ClusterStore, DynamicStore, KindDescriptor};
use crate::token_index::TokenIndex;
use crate::watch::{Watch, WatchEvent, WatchSender};

pub const SECRETS_CACHE: &str = "secrets";
pub const SERVICE_ACCOUNTS_CACHE: &str = "serviceaccounts";
pub const BOOTSTRAPS_CACHE: &str = "rkebootstraps";

/// Server-side timeout of explicit watches, in seconds. The API server rejects
/// values of 295 and above.
pub const DEFAULT_WATCH_TIMEOUT_SECONDS: u32 = 290;

/// Object store reading through watch-fed caches.
///
/// Cache tasks are spawned by [`KubeClusterStore::start`] and run for the life
/// of the process.
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
    namespace: Option<String>,
    token_index: TokenIndex,
    secrets: Arc<ObjectCache<Secret>>,
    service_accounts: Arc<ObjectCache<ServiceAccount>>,
    bootstraps: Arc<ObjectCache<RKEBootstrap>>,
    watch_timeout: u32,
}

impl std::fmt::Debug for KubeClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterStore")
            .field("namespace", &self.namespace)
            .field("secrets", &self.secrets)
            .field("service_accounts", &self.service_accounts)
            .field("bootstraps", &self.bootstraps)
            .finish_non_exhaustive()
    }
}

fn token_secret_fields() -> String {
    format!("type={SERVICE_ACCOUNT_TOKEN_TYPE}")
}

impl KubeClusterStore {
    /// Start caches over all namespaces
    pub fn start(client: Client) -> Self {
        Self::start_in(client, None)
    }

    /// Start caches scoped to `namespace`, or all namespaces when `None`
    pub fn start_in(client: Client, namespace: Option<String>) -> Self {
        let token_index = TokenIndex::new();
        let indexer = token_index.clone();
        let store = Self {
            client,
            namespace,
            token_index,
            secrets: Arc::new(ObjectCache::with_indexer(SECRETS_CACHE, move |s: &Secret| {
                indexer.key_for_secret(s)
            })),
            service_accounts: Arc::new(ObjectCache::new(SERVICE_ACCOUNTS_CACHE)),
            bootstraps: Arc::new(ObjectCache::new(BOOTSTRAPS_CACHE)),
            watch_timeout: DEFAULT_WATCH_TIMEOUT_SECONDS,
        };

        tokio::spawn(
            Arc::clone(&store.secrets)
                .run(store.scoped_api(), watcher::Config::default().fields(&token_secret_fields())),
        );
        tokio::spawn(
            Arc::clone(&store.service_accounts).run(store.scoped_api(), watcher::Config::default()),
        );
        tokio::spawn(Arc::clone(&store.bootstraps).run(store.scoped_api(), watcher::Config::default()));

        info!(
            "Object store caches started (namespace: {})",
            store.namespace.as_deref().unwrap_or("<all>")
        );
        store
    }

    /// Override the server-side timeout of explicit watches
    #[must_use]
    pub fn with_watch_timeout(mut self, seconds: u32) -> Self {
        self.watch_timeout = seconds;
        self
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn scoped_api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    async fn open_watch<K>(&self, api: Api<K>, params: WatchParams, kind: &'static str) -> Result<Watch<K>, StoreError>
    where
        K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    {
        // "0" replays the current state as Added events before live changes
        let stream = api
            .watch(&params, "0")
            .await
            .map_err(|e| StoreError::Watch(format!("{kind}: {e}")))?;
        let (tx, watch) = Watch::channel();
        tokio::spawn(forward_watch(stream.boxed(), tx, kind));
        Ok(watch)
    }
}

async fn forward_watch<K, S>(mut stream: S, tx: WatchSender<K>, kind: &'static str)
where
    S: Stream<Item = kube::Result<kube::core::WatchEvent<K>>> + Unpin,
{
    loop {
        let item = tokio::select! {
            () = tx.closed() => break,
            item = stream.next() => item,
        };
        let event = match item {
            Some(Ok(kube::core::WatchEvent::Added(obj))) => WatchEvent::Added(obj),
            Some(Ok(kube::core::WatchEvent::Modified(obj))) => WatchEvent::Modified(obj),
            Some(Ok(kube::core::WatchEvent::Deleted(obj))) => WatchEvent::Deleted(obj),
            Some(Ok(kube::core::WatchEvent::Bookmark(_))) => continue,
            Some(Ok(kube::core::WatchEvent::Error(e))) => {
                warn!("{} watch error event: {:?}", kind, e);
                break;
            }
            Some(Err(e)) => {
                warn!("{} watch stream error: {}", kind, e);
                break;
            }
            None => break,
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("{} watch closed", kind);
}

#[async_trait]
impl ClusterStore for KubeClusterStore {
    fn unsynced_caches(&self) -> Vec<&'static str> {
        [
            (SECRETS_CACHE, self.secrets.is_synced()),
            (SERVICE_ACCOUNTS_CACHE, self.service_accounts.is_synced()),
            (BOOTSTRAPS_CACHE, self.bootstraps.is_synced()),
        ]
        .into_iter()
        .filter(|(_, synced)| !synced)
        .map(|(name, _)| name)
        .collect()
    }

    fn resync(&self, cache: &str) {
        match cache {
            SECRETS_CACHE => self.secrets.request_resync(),
            SERVICE_ACCOUNTS_CACHE => self.service_accounts.request_resync(),
            BOOTSTRAPS_CACHE => self.bootstraps.request_resync(),
            other => warn!("Resync requested for unknown cache {}", other),
        }
    }

    async fn secrets_by_token(&self, token: &str) -> Result<Vec<Secret>, StoreError> {
        Ok(self.secrets.by_index(&self.token_index.key(token.as_bytes())))
    }

    async fn get_token_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.secrets
            .get(namespace, name)
            .ok_or_else(|| StoreError::not_found("Secret", namespace, name))
    }

    async fn fetch_token_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Secret", namespace, name))?;
        if secret.type_.as_deref() != Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
            return Err(StoreError::not_found("Secret", namespace, name));
        }
        Ok(secret)
    }

    async fn watch_token_secrets(&self, namespace: &str) -> Result<Watch<Secret>, StoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = WatchParams::default()
            .fields(&token_secret_fields())
            .timeout(self.watch_timeout);
        self.open_watch(api, params, "Secret").await
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, StoreError> {
        self.service_accounts
            .get(namespace, name)
            .ok_or_else(|| StoreError::not_found("ServiceAccount", namespace, name))
    }

    async fn list_service_accounts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ServiceAccount>, StoreError> {
        Ok(self.service_accounts.list(namespace, selector))
    }

    async fn watch_service_accounts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Watch<ServiceAccount>, StoreError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let params = WatchParams::default()
            .labels(&selector.to_query())
            .timeout(self.watch_timeout);
        self.open_watch(api, params, "ServiceAccount").await
    }

    async fn get_bootstrap(&self, namespace: &str, name: &str) -> Result<RKEBootstrap, StoreError> {
        self.bootstraps
            .get(namespace, name)
            .ok_or_else(|| StoreError::not_found("RKEBootstrap", namespace, name))
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, "Machine", namespace, name))
    }

    async fn update_machine(&self, machine: &Machine) -> Result<Machine, StoreError> {
        let namespace = machine.metadata.namespace.as_deref().unwrap_or_default();
        let name = machine
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::InvalidObject("Machine has no name".to_string()))?;
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), machine)
            .await
            .map_err(|e| StoreError::from_kube(e, "Machine", namespace, name))
    }
}

fn dynamic_name(object: &DynamicObject) -> Result<(&str, &str), StoreError> {
    let name = object
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| StoreError::InvalidObject("object has no name".to_string()))?;
    Ok((object.metadata.namespace.as_deref().unwrap_or_default(), name))
}

#[async_trait]
impl DynamicStore for KubeClusterStore {
    async fn get(&self, kind: &KindDescriptor, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource());
        api.get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &kind.kind, namespace, name))
    }

    async fn update_status(&self, kind: &KindDescriptor, object: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (namespace, name) = dynamic_name(object)?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource());
        let patch = json!({
            "metadata": { "resourceVersion": object.metadata.resource_version },
            "status": object.data.get("status").cloned().unwrap_or_default(),
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &kind.kind, namespace, name))
    }

    async fn update(&self, kind: &KindDescriptor, object: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (namespace, name) = dynamic_name(object)?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource());
        api.replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| StoreError::from_kube(e, &kind.kind, namespace, name))
    }
}
