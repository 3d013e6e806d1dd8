//! Reconciliation logic for CAPR resources.
//!
//! - `machine_node_lookup`: links a bootstrapped machine's infrastructure
//!   object to the Node that registered for it in the downstream cluster

pub mod machine_node_lookup;

pub use machine_node_lookup::{LinkState, NODE_WAIT_REQUEUE};

use crate::backoff::FibonacciBackoff;
use capr_client::{ClusterStore, DynamicStore, NodeLister};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Error backoff floor and cap, in seconds
const ERROR_BACKOFF_MIN_SECONDS: u64 = 5;
const ERROR_BACKOFF_MAX_SECONDS: u64 = 300;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(ERROR_BACKOFF_MIN_SECONDS, ERROR_BACKOFF_MAX_SECONDS),
            error_count: 0,
        }
    }
}

/// Reconciles RKEBootstraps against infrastructure machines and downstream Nodes.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ClusterStore>,
    pub(crate) dynamic: Arc<dyn DynamicStore>,
    pub(crate) nodes: Arc<dyn NodeLister>,
    /// Error tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(store: Arc<dyn ClusterStore>, dynamic: Arc<dyn DynamicStore>, nodes: Arc<dyn NodeLister>) -> Self {
        Self {
            store,
            dynamic,
            nodes,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Delay before retrying a failed resource, and how many times in a row it failed
    pub fn next_error_backoff(&self, resource_key: &str) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states.entry(resource_key.to_string()).or_insert_with(BackoffState::new);
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (Duration::from_secs(ERROR_BACKOFF_MAX_SECONDS), 0)
            }
        }
    }

    /// Forget the error history of a resource after a successful pass
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capr_client::{MockClusterStore, MockDynamicStore, MockNodeLister};

    fn reconciler() -> Reconciler {
        Reconciler::new(
            Arc::new(MockClusterStore::new()),
            Arc::new(MockDynamicStore::new()),
            Arc::new(MockNodeLister::new()),
        )
    }

    #[test]
    fn test_error_backoff_grows_per_resource() {
        let reconciler = reconciler();
        assert_eq!(reconciler.next_error_backoff("ns/b1"), (Duration::from_secs(5), 1));
        assert_eq!(reconciler.next_error_backoff("ns/b1"), (Duration::from_secs(5), 2));
        assert_eq!(reconciler.next_error_backoff("ns/b1"), (Duration::from_secs(10), 3));
        assert_eq!(reconciler.next_error_backoff("ns/b2"), (Duration::from_secs(5), 1));
    }

    #[test]
    fn test_reset_backoff() {
        let reconciler = reconciler();
        reconciler.next_error_backoff("ns/b1");
        reconciler.next_error_backoff("ns/b1");
        reconciler.next_error_backoff("ns/b1");
        reconciler.reset_backoff("ns/b1");
        assert_eq!(reconciler.next_error_backoff("ns/b1"), (Duration::from_secs(5), 1));
    }
}
