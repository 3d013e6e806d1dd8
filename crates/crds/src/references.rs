//! Kubernetes object references used by CAPR resources
//!
//! Machines point at their infrastructure object and bootstrap config through
//! `ObjectReference`-shaped fields. The infrastructure kind is provider specific,
//! so the reference carries `apiVersion` and `kind` and is resolved dynamically.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to an object of an arbitrary kind
///
/// Mirrors the Kubernetes `ObjectReference` subset Cluster API uses:
/// - `apiVersion`: e.g. "infrastructure.cluster.x-k8s.io/v1beta1" or "v1"
/// - `kind`: e.g. "DockerMachine"
/// - `name`: the referenced object's name
/// - `namespace`: optional, defaults to the referencing object's namespace
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referenced object
    #[serde(default)]
    pub api_version: String,

    /// Kind of the referenced object
    #[serde(default)]
    pub kind: String,

    /// Name of the referenced object
    #[serde(default)]
    pub name: String,

    /// Namespace of the referenced object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ObjectReference {
    /// Create a reference in the referencing object's namespace
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Split `apiVersion` into `(group, version)`. Core kinds have an empty group.
    #[must_use]
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }

    /// Namespace to resolve the reference in, given the referencing object's namespace
    #[must_use]
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(default)
    }
}
