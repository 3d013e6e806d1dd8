//! Node plan wire types.
//!
//! A `NodePlan` is what the system agent on a node executes. The generating
//! controller serializes it as JSON into the machine plan secret, so the field
//! names here are part of the agent protocol.

use serde::{Deserialize, Serialize};

/// Desired state for a single node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePlan {
    /// Files written to the node before instructions run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PlanFile>,

    /// One-time instructions, executed in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<OneTimeInstruction>,

    /// Recurring probes whose output is reported back
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub periodic_instructions: Vec<PeriodicInstruction>,
}

/// An instruction the agent runs once per plan application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneTimeInstruction {
    pub name: String,

    /// Image to extract and run from; empty runs directly on the host
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    pub command: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub save_output: bool,
}

/// A probe the agent runs every `period_seconds`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodicInstruction {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    pub command: String,

    pub period_seconds: u64,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub save_stderr_output: bool,
}

/// A file rendered onto the node.
///
/// The agent cannot delete files. A `dynamic` file may be rewritten on every
/// reconcile (and rendered empty to logically remove it) without triggering a
/// service restart; `minor` marks changes that do not require a plan re-run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFile {
    /// Base64-encoded file content
    pub content: String,

    /// Absolute path on the node
    pub path: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub permissions: String,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dynamic: bool,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub minor: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_json_field_names() {
        let plan = NodePlan {
            files: vec![PlanFile {
                content: "YQ==".to_string(),
                path: "/tmp/a".to_string(),
                dynamic: true,
                ..Default::default()
            }],
            instructions: vec![OneTimeInstruction {
                name: "install".to_string(),
                command: "sh".to_string(),
                args: vec!["-c".to_string(), "run.sh".to_string()],
                ..Default::default()
            }],
            periodic_instructions: vec![PeriodicInstruction {
                name: "etcd-name".to_string(),
                command: "sh".to_string(),
                period_seconds: 600,
                ..Default::default()
            }],
        };

        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["files"][0]["dynamic"], true);
        assert!(value["files"][0].get("minor").is_none());
        assert_eq!(value["instructions"][0]["args"][1], "run.sh");
        assert!(value["instructions"][0].get("image").is_none());
        assert_eq!(value["periodicInstructions"][0]["periodSeconds"], 600);
    }
}
