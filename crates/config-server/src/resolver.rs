//! Request-to-machine resolution.
//!
//! The plan delivery server never trusts the caller's claims directly: the
//! bearer token is looked up in the token index and walked back through
//! service account, bootstrap and machine ownership.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use capr_client::{ClusterStore, StoreError};
use capr_settings::{CAPI_API_SERVER_URL, Settings};
use crds::{MACHINE_NAME_LABEL, ROLE_BOOTSTRAP, ROLE_LABEL, SERVICE_ACCOUNT_NAME_ANNOTATION, SERVICE_ACCOUNT_UID_ANNOTATION};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::ownership::is_owned_by_machine;

/// Machine a request was authenticated as
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineRef {
    pub namespace: String,
    pub name: String,
}

/// Maps incoming requests to the machine they act for
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    /// Whether the backing caches are synced. Unsynced caches are asked to resync.
    fn ready(&self) -> bool;

    /// Machine the request authenticates as, `None` when it cannot be resolved
    async fn machine_for_request(&self, headers: &HeaderMap) -> Result<Option<MachineRef>, StoreError>;

    /// API server URL to put in the agent's kubeconfig
    fn api_server_url(&self, headers: &HeaderMap) -> String;
}

/// Bearer token from an `Authorization: Bearer <token>` header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

/// Resolver for a standalone management cluster, backed by the object store
/// caches and the settings provider
#[derive(Debug)]
pub struct StandaloneResolver<S: ?Sized> {
    store: Arc<S>,
    settings: Arc<Settings>,
}

impl<S: ClusterStore + ?Sized> StandaloneResolver<S> {
    pub fn new(store: Arc<S>, settings: Arc<Settings>) -> Self {
        Self { store, settings }
    }
}

#[async_trait::async_trait]
impl<S: ClusterStore + ?Sized> Resolver for StandaloneResolver<S> {
    fn ready(&self) -> bool {
        let unsynced = self.store.unsynced_caches();
        for cache in &unsynced {
            warn!(cache = %cache, "Cache not synced, requesting resync");
            self.store.resync(cache);
        }
        unsynced.is_empty()
    }

    async fn machine_for_request(&self, headers: &HeaderMap) -> Result<Option<MachineRef>, StoreError> {
        let Some(token) = extract_bearer_token(headers) else {
            return Ok(None);
        };
        let secrets = self.store.secrets_by_token(token).await?;
        let Some(secret) = secrets.first() else {
            debug!("No token secret matches bearer token");
            return Ok(None);
        };

        let namespace = secret.namespace().unwrap_or_default();
        let annotations = secret.annotations();
        let Some(account_name) = annotations.get(SERVICE_ACCOUNT_NAME_ANNOTATION) else {
            return Ok(None);
        };
        let account = self.store.get_service_account(&namespace, account_name).await?;

        let labels = account.labels();
        if labels.get(ROLE_LABEL).map(String::as_str) != Some(ROLE_BOOTSTRAP)
            || account.metadata.uid.as_ref() != annotations.get(SERVICE_ACCOUNT_UID_ANNOTATION)
        {
            debug!(namespace = %namespace, account = %account_name, "Token does not belong to a bootstrap account");
            return Ok(None);
        }

        let Some(machine_name) = labels.get(MACHINE_NAME_LABEL).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        if !is_owned_by_machine(self.store.as_ref(), machine_name, &account).await? {
            debug!(namespace = %namespace, account = %account_name, machine = %machine_name, "Bootstrap account not owned by machine");
            return Ok(None);
        }

        Ok(Some(MachineRef {
            namespace: account.namespace().unwrap_or(namespace),
            name: machine_name.clone(),
        }))
    }

    fn api_server_url(&self, _headers: &HeaderMap) -> String {
        self.settings.get(CAPI_API_SERVER_URL)
    }
}
