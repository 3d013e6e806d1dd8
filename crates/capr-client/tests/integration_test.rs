//! Integration tests for the Kubernetes-backed object store
//!
//! These tests require a reachable cluster (current kubeconfig context).
//! Set CAPR_TEST_NAMESPACE to pick the namespace, default "default".

use std::time::Duration;

use capr_client::{ClusterStore, KubeClusterStore, LabelSelector};

fn namespace() -> String {
    std::env::var("CAPR_TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

async fn synced_store() -> KubeClusterStore {
    let client = kube::Client::try_default().await.expect("Failed to create client");
    let store = KubeClusterStore::start_in(client, Some(namespace()));
    for _ in 0..30 {
        if store.unsynced_caches().is_empty() {
            return store;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("caches did not sync: {:?}", store.unsynced_caches());
}

#[tokio::test]
#[ignore] // Requires a running cluster with the CAPR CRDs installed
async fn test_caches_sync() {
    let store = synced_store().await;
    assert!(store.unsynced_caches().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_list_service_accounts() {
    let store = synced_store().await;
    let accounts = store
        .list_service_accounts(&namespace(), &LabelSelector::new())
        .await
        .expect("Failed to list service accounts");

    // Every namespace has a default service account
    assert!(accounts.iter().any(|sa| sa.metadata.name.as_deref() == Some("default")));
}

#[tokio::test]
#[ignore]
async fn test_watch_replays_existing_accounts() {
    let store = synced_store().await;
    let mut watch = store
        .watch_service_accounts(&namespace(), &LabelSelector::new())
        .await
        .expect("Failed to open watch");

    let first = tokio::time::timeout(Duration::from_secs(10), watch.next())
        .await
        .expect("No event within 10s");
    assert!(first.is_some());
    watch.stop().await;
}
