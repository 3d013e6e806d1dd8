//! In-memory object store for unit testing
//!
//! Implements the store traits without an API server:
//! - `MockClusterStore` - cached objects, live watches and machine writes
//! - `dynamic.rs` - `MockDynamicStore` for infrastructure machines
//! - `nodes.rs` - `MockNodeLister` for downstream nodes
//! - `helpers.rs` - fixture builders for the objects the tests wire together
//!
//! Watches opened on the mock replay matching objects as `Added` events and
//! then receive every later `add_*` call, so tests can drive the
//! cascading lookup from another task.

mod dynamic;
pub mod helpers;
mod nodes;

pub use dynamic::{DynamicWrite, MockDynamicStore};
pub use nodes::MockNodeLister;

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::ClusterStore;
use crate::watch::{Watch, WatchEvent, WatchSender};
use crds::{Machine, RKEBootstrap, SERVICE_ACCOUNT_TOKEN_KEY, SERVICE_ACCOUNT_TOKEN_TYPE};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type ObjectKey = (String, String);

fn key_of<K: kube::Resource>(obj: &K) -> ObjectKey {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn is_token_secret(secret: &Secret) -> bool {
    secret.type_.as_deref() == Some(SERVICE_ACCOUNT_TOKEN_TYPE)
}

/// Mock object store for testing
#[derive(Clone, Default)]
pub struct MockClusterStore {
    pub(crate) secrets: Arc<Mutex<HashMap<ObjectKey, Secret>>>,
    pub(crate) service_accounts: Arc<Mutex<HashMap<ObjectKey, ServiceAccount>>>,
    pub(crate) bootstraps: Arc<Mutex<HashMap<ObjectKey, RKEBootstrap>>>,
    pub(crate) machines: Arc<Mutex<HashMap<ObjectKey, Machine>>>,
    secret_watchers: Arc<Mutex<Vec<(String, WatchSender<Secret>)>>>,
    account_watchers: Arc<Mutex<Vec<(String, LabelSelector, WatchSender<ServiceAccount>)>>>,
    watches_opened: Arc<AtomicUsize>,
    hidden_token_reads: Arc<AtomicUsize>,
    token_fetches: Arc<AtomicUsize>,
    unsynced: Arc<Mutex<Vec<&'static str>>>,
    resyncs: Arc<Mutex<Vec<String>>>,
    pending_conflicts: Arc<AtomicUsize>,
    machine_updates: Arc<AtomicUsize>,
    next_version: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockClusterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockClusterStore")
            .field("watches_opened", &self.watches_opened())
            .finish_non_exhaustive()
    }
}

impl MockClusterStore {
    /// Create an empty, fully synced mock store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_resource_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or replace a secret, notifying token secret watches
    pub fn add_secret(&self, secret: Secret) {
        let key = key_of(&secret);
        let existed = self
            .secrets
            .lock()
            .unwrap()
            .insert(key.clone(), secret.clone())
            .is_some();
        if !is_token_secret(&secret) {
            return;
        }
        let event = if existed {
            WatchEvent::Modified(secret)
        } else {
            WatchEvent::Added(secret)
        };
        let mut watchers = self.secret_watchers.lock().unwrap();
        watchers.retain(|(_, tx)| !tx.is_closed());
        for (ns, tx) in watchers.iter() {
            if *ns == key.0 {
                let _ = tx.try_send(event.clone());
            }
        }
    }

    /// Insert or replace a service account, notifying matching watches
    pub fn add_service_account(&self, account: ServiceAccount) {
        let key = key_of(&account);
        let existed = self
            .service_accounts
            .lock()
            .unwrap()
            .insert(key.clone(), account.clone())
            .is_some();
        let event = if existed {
            WatchEvent::Modified(account.clone())
        } else {
            WatchEvent::Added(account.clone())
        };
        let mut watchers = self.account_watchers.lock().unwrap();
        watchers.retain(|(_, _, tx)| !tx.is_closed());
        for (ns, selector, tx) in watchers.iter() {
            if *ns == key.0 && selector.matches(account.metadata.labels.as_ref()) {
                let _ = tx.try_send(event.clone());
            }
        }
    }

    pub fn add_bootstrap(&self, bootstrap: RKEBootstrap) {
        self.bootstraps.lock().unwrap().insert(key_of(&bootstrap), bootstrap);
    }

    /// Insert or replace a machine, assigning a fresh resource version
    pub fn add_machine(&self, mut machine: Machine) {
        machine.metadata.resource_version = Some(self.next_resource_version());
        self.machines.lock().unwrap().insert(key_of(&machine), machine);
    }

    pub fn machine(&self, namespace: &str, name: &str) -> Option<Machine> {
        self.machines
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Mark a cache as not yet synced
    pub fn set_unsynced(&self, cache: &'static str) {
        self.unsynced.lock().unwrap().push(cache);
    }

    /// Caches for which a resync was requested
    pub fn resync_requests(&self) -> Vec<String> {
        self.resyncs.lock().unwrap().clone()
    }

    /// Number of watches opened so far
    pub fn watches_opened(&self) -> usize {
        self.watches_opened.load(Ordering::SeqCst)
    }

    /// Number of live (not yet stopped) watches
    pub fn live_watches(&self) -> usize {
        let secrets = self.secret_watchers.lock().unwrap();
        let accounts = self.account_watchers.lock().unwrap();
        secrets.iter().filter(|(_, tx)| !tx.is_closed()).count()
            + accounts.iter().filter(|(_, _, tx)| !tx.is_closed()).count()
    }

    /// End every open watch from the producer side
    pub fn close_watches(&self) {
        self.secret_watchers.lock().unwrap().clear();
        self.account_watchers.lock().unwrap().clear();
    }

    /// Answer the next `n` cached token secret reads with not found, as a
    /// cache that lags behind the API server would
    pub fn hide_cached_token_secrets(&self, n: usize) {
        self.hidden_token_reads.store(n, Ordering::SeqCst);
    }

    /// Number of token secrets read past the cache
    pub fn token_fetches(&self) -> usize {
        self.token_fetches.load(Ordering::SeqCst)
    }

    /// Fail the next `n` machine updates with a conflict
    pub fn inject_machine_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    /// Number of accepted machine updates
    pub fn machine_updates(&self) -> usize {
        self.machine_updates.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    fn unsynced_caches(&self) -> Vec<&'static str> {
        self.unsynced.lock().unwrap().clone()
    }

    fn resync(&self, cache: &str) {
        self.resyncs.lock().unwrap().push(cache.to_string());
    }

    async fn secrets_by_token(&self, token: &str) -> Result<Vec<Secret>, StoreError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .values()
            .filter(|s| is_token_secret(s))
            .filter(|s| {
                s.data
                    .as_ref()
                    .and_then(|d| d.get(SERVICE_ACCOUNT_TOKEN_KEY))
                    .is_some_and(|t| !t.0.is_empty() && t.0 == token.as_bytes())
            })
            .cloned()
            .collect())
    }

    async fn get_token_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        if self
            .hidden_token_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::not_found("Secret", namespace, name));
        }
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .filter(|s| is_token_secret(s))
            .cloned()
            .ok_or_else(|| StoreError::not_found("Secret", namespace, name))
    }

    async fn fetch_token_secret(&self, namespace: &str, name: &str) -> Result<Secret, StoreError> {
        self.token_fetches.fetch_add(1, Ordering::SeqCst);
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .filter(|s| is_token_secret(s))
            .cloned()
            .ok_or_else(|| StoreError::not_found("Secret", namespace, name))
    }

    async fn watch_token_secrets(&self, namespace: &str) -> Result<Watch<Secret>, StoreError> {
        self.watches_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, watch) = Watch::channel();
        for secret in self.secrets.lock().unwrap().values() {
            if secret.namespace().as_deref() == Some(namespace) && is_token_secret(secret) {
                let _ = tx.try_send(WatchEvent::Added(secret.clone()));
            }
        }
        self.secret_watchers.lock().unwrap().push((namespace.to_string(), tx));
        Ok(watch)
    }

    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount, StoreError> {
        self.service_accounts
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("ServiceAccount", namespace, name))
    }

    async fn list_service_accounts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ServiceAccount>, StoreError> {
        Ok(self
            .service_accounts
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), sa)| ns == namespace && selector.matches(sa.metadata.labels.as_ref()))
            .map(|(_, sa)| sa.clone())
            .collect())
    }

    async fn watch_service_accounts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Watch<ServiceAccount>, StoreError> {
        self.watches_opened.fetch_add(1, Ordering::SeqCst);
        let (tx, watch) = Watch::channel();
        for ((ns, _), sa) in self.service_accounts.lock().unwrap().iter() {
            if ns == namespace && selector.matches(sa.metadata.labels.as_ref()) {
                let _ = tx.try_send(WatchEvent::Added(sa.clone()));
            }
        }
        self.account_watchers
            .lock()
            .unwrap()
            .push((namespace.to_string(), selector.clone(), tx));
        Ok(watch)
    }

    async fn get_bootstrap(&self, namespace: &str, name: &str) -> Result<RKEBootstrap, StoreError> {
        self.bootstraps
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found("RKEBootstrap", namespace, name))
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Machine, StoreError> {
        self.machine(namespace, name)
            .ok_or_else(|| StoreError::not_found("Machine", namespace, name))
    }

    async fn update_machine(&self, machine: &Machine) -> Result<Machine, StoreError> {
        let key = key_of(machine);
        if self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict(format!("Machine {}/{}: injected conflict", key.0, key.1)));
        }

        let mut machines = self.machines.lock().unwrap();
        let stored = machines
            .get(&key)
            .ok_or_else(|| StoreError::not_found("Machine", &key.0, &key.1))?;
        if stored.metadata.resource_version != machine.metadata.resource_version {
            return Err(StoreError::Conflict(format!(
                "Machine {}/{}: resource version is stale",
                key.0, key.1
            )));
        }

        let mut updated = machine.clone();
        updated.metadata.resource_version = Some(self.next_resource_version());
        machines.insert(key, updated.clone());
        self.machine_updates.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }
}
