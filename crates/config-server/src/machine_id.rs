//! Recording the agent-reported machine ID on the Machine

use capr_client::{ClusterStore, StoreError};
use crds::MACHINE_ID_LABEL;
use tracing::debug;

/// Attempts before a conflicting machine update is reported to the caller
pub const MACHINE_ID_UPDATE_ATTEMPTS: usize = 5;

/// Set the machine-ID label on a Machine when it is unset or stale.
///
/// Conflicts are retried against a fresh read of the Machine.
pub async fn set_machine_id<S: ClusterStore + ?Sized>(
    store: &S,
    namespace: &str,
    name: &str,
    machine_id: &str,
) -> Result<(), StoreError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut machine = store.get_machine(namespace, name).await?;
        let labels = machine.metadata.labels.get_or_insert_with(Default::default);
        if labels.get(MACHINE_ID_LABEL).map(String::as_str) == Some(machine_id) {
            return Ok(());
        }
        labels.insert(MACHINE_ID_LABEL.to_string(), machine_id.to_string());

        match store.update_machine(&machine).await {
            Ok(_) => {
                debug!(namespace = %namespace, machine = %name, machine_id = %machine_id, "Updated machine ID");
                return Ok(());
            }
            Err(e) if e.is_conflict() && attempt < MACHINE_ID_UPDATE_ATTEMPTS => {
                debug!(namespace = %namespace, machine = %name, attempt, "Machine update conflicted, retrying");
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capr_client::mock::helpers::machine;
    use capr_client::{KindDescriptor, MockClusterStore};

    fn store_with_machine() -> MockClusterStore {
        let store = MockClusterStore::new();
        let kind = KindDescriptor::new("infrastructure.cluster.x-k8s.io/v1beta1", "DockerMachine");
        store.add_machine(machine("ns", "m1", "c1", &kind));
        store
    }

    fn label(store: &MockClusterStore) -> Option<String> {
        store
            .machine("ns", "m1")
            .and_then(|m| m.metadata.labels)
            .and_then(|l| l.get(MACHINE_ID_LABEL).cloned())
    }

    #[tokio::test]
    async fn test_sets_label() {
        let store = store_with_machine();
        set_machine_id(&store, "ns", "m1", "id-1").await.unwrap();
        assert_eq!(label(&store).as_deref(), Some("id-1"));
        assert_eq!(store.machine_updates(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_label_is_not_written() {
        let store = store_with_machine();
        set_machine_id(&store, "ns", "m1", "id-1").await.unwrap();
        set_machine_id(&store, "ns", "m1", "id-1").await.unwrap();
        assert_eq!(store.machine_updates(), 1);

        set_machine_id(&store, "ns", "m1", "id-2").await.unwrap();
        assert_eq!(label(&store).as_deref(), Some("id-2"));
        assert_eq!(store.machine_updates(), 2);
    }

    #[tokio::test]
    async fn test_conflict_retried() {
        let store = store_with_machine();
        store.inject_machine_conflicts(2);
        set_machine_id(&store, "ns", "m1", "id-1").await.unwrap();
        assert_eq!(label(&store).as_deref(), Some("id-1"));
    }

    #[tokio::test]
    async fn test_persistent_conflict_reported() {
        let store = store_with_machine();
        store.inject_machine_conflicts(MACHINE_ID_UPDATE_ATTEMPTS);
        let err = set_machine_id(&store, "ns", "m1", "id-1").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.machine_updates(), 0);
    }

    #[tokio::test]
    async fn test_missing_machine() {
        let store = MockClusterStore::new();
        let err = set_machine_id(&store, "ns", "m1", "id-1").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
