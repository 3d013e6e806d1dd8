//! CAPR Object Store Client
//!
//! Typed access to the cluster objects the plan delivery server and the node
//! identity reconciler work with:
//!
//! - cached reads of Secrets, ServiceAccounts and RKEBootstraps, with
//!   per-cache readiness and a salted token index over service account tokens
//! - explicit watch streams that callers stop and drain
//! - direct reads and optimistic-concurrency writes of Machines
//! - kind-dynamic access to infrastructure machines
//! - Node listing in downstream clusters
//!
//! # Example
//!
//! ```no_run
//! use capr_client::{ClusterStore, KubeClusterStore, LabelSelector};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeClusterStore::start(client);
//!
//! let selector = LabelSelector::new().with("rke.cattle.io/machine-name", "m1");
//! let accounts = store.list_service_accounts("fleet-default", &selector).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod client;
pub mod error;
pub mod nodes;
pub mod selector;
#[path = "trait.rs"]
pub mod store_trait;
pub mod token_index;
pub mod watch;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubeClusterStore;
pub use error::StoreError;
pub use nodes::DownstreamNodeLister;
pub use selector::LabelSelector;
pub use store_trait::{ClusterStore, DynamicStore, KindDescriptor, NodeLister};
pub use token_index::TokenIndex;
pub use watch::{Watch, WatchEvent};
#[cfg(feature = "test-util")]
pub use mock::{MockClusterStore, MockDynamicStore, MockNodeLister};
