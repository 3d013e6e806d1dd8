//! RKEBootstrap CRD
//!
//! Per-machine bootstrap gate. The external generating controller flips
//! `status.ready` once the plan secret and service accounts exist.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "rke.cattle.io",
    version = "v1",
    kind = "RKEBootstrap",
    plural = "rkebootstraps",
    namespaced,
    status = "RKEBootstrapStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RKEBootstrapSpec {
    /// Name of the cluster the machine belongs to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// Kubernetes version to bootstrap
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RKEBootstrapStatus {
    /// Whether the bootstrap data is ready to be consumed
    #[serde(default)]
    pub ready: bool,

    /// Secret holding the bootstrap data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

impl RKEBootstrap {
    /// True once `status.ready` is set and a non-empty data secret is recorded
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.ready && s.data_secret_name.as_deref().is_some_and(|n| !n.is_empty())
        })
    }
}
