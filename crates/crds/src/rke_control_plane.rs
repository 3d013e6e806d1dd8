//! RKEControlPlane CRD
//!
//! Desired configuration for an RKE2/K3s cluster. Only the fields the node
//! plan builder reads are modelled here; rollout and rotation state is owned by
//! the external control plane controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "rke.cattle.io",
    version = "v1",
    kind = "RKEControlPlane",
    plural = "rkecontrolplanes",
    namespaced,
    status = "RKEControlPlaneStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RKEControlPlaneSpec {
    /// Name of the cluster
    #[serde(default)]
    pub cluster_name: String,

    /// Kubernetes version, e.g. "v1.30.4+rke2r1" or "v1.30.4+k3s1"
    #[serde(default)]
    pub kubernetes_version: String,

    /// Environment variables passed to the installer on every node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_env_vars: Vec<EnvVar>,

    /// Raw manifest text deployed as the cluster addons file
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub additional_manifest: String,

    /// Overrides for on-node data directories
    #[serde(default)]
    pub data_directories: DataDirectories,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    #[serde(default)]
    pub name: String,

    /// Variable value. Empty values are not rendered.
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataDirectories {
    /// Data directory for the system agent
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_agent: String,

    /// Data directory for provisioning artifacts
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provisioning: String,

    /// Data directory for the Kubernetes distribution (defaults to /var/lib/rancher/<runtime>)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub k8s_distro: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RKEControlPlaneStatus {
    /// Whether the control plane is ready
    #[serde(default)]
    pub ready: bool,

    /// Generation of the rendered node configuration; bumps force a restart stamp change
    #[serde(default)]
    pub config_generation: i64,

    /// Last observed metadata.generation
    #[serde(default)]
    pub observed_generation: i64,
}

impl RKEControlPlane {
    /// Configuration generation from status, zero when no status was written yet
    #[must_use]
    pub fn config_generation(&self) -> i64 {
        self.status.as_ref().map_or(0, |s| s.config_generation)
    }
}
