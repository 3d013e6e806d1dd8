//! Mock downstream node lister

use crate::error::StoreError;
use crate::selector::LabelSelector;
use crate::store_trait::NodeLister;
use k8s_openapi::api::core::v1::Node;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Nodes per (namespace, cluster name)
#[derive(Debug, Clone, Default)]
pub struct MockNodeLister {
    nodes: Arc<Mutex<HashMap<(String, String), Vec<Node>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockNodeLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a cluster reachable without any nodes yet
    pub fn add_cluster(&self, namespace: &str, cluster_name: &str) {
        self.nodes
            .lock()
            .unwrap()
            .entry((namespace.to_string(), cluster_name.to_string()))
            .or_default();
    }

    pub fn add_node(&self, namespace: &str, cluster_name: &str, node: Node) {
        self.nodes
            .lock()
            .unwrap()
            .entry((namespace.to_string(), cluster_name.to_string()))
            .or_default()
            .push(node);
    }

    /// Number of `list_nodes` calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NodeLister for MockNodeLister {
    async fn list_nodes(
        &self,
        namespace: &str,
        cluster_name: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Node>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let nodes = self.nodes.lock().unwrap();
        let Some(cluster) = nodes.get(&(namespace.to_string(), cluster_name.to_string())) else {
            return Err(StoreError::not_found("Secret", namespace, format!("{cluster_name}-kubeconfig")));
        };
        Ok(cluster
            .iter()
            .filter(|n| selector.matches(n.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }
}
