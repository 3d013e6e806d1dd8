//! Machine CRD
//!
//! Subset of the Cluster API `Machine` resource. CAPR never creates machines;
//! it reads them, maintains the machine-id label and checks `spec.providerID`.

use crate::references::ObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Name of the cluster this machine belongs to
    #[serde(default)]
    pub cluster_name: String,

    /// Bootstrap configuration reference and generated data secret
    #[serde(default)]
    pub bootstrap: MachineBootstrap,

    /// Provider-specific infrastructure object backing this machine
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,

    /// Provider identifier, copied from the node once it registers
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Kubernetes version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineBootstrap {
    /// Reference to the bootstrap config (an `RKEBootstrap`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding the bootstrap data once generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Machine phase as reported by Cluster API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Whether the bootstrap provider reported ready
    #[serde(default)]
    pub bootstrap_ready: bool,

    /// Whether the infrastructure provider reported ready
    #[serde(default)]
    pub infrastructure_ready: bool,
}

impl Machine {
    /// Provider ID, treating an empty string as unset
    #[must_use]
    pub fn provider_id(&self) -> Option<&str> {
        self.spec.provider_id.as_deref().filter(|id| !id.is_empty())
    }
}
