//! Agent kubeconfig rendering

use serde::{Deserialize, Serialize};

/// Name shared by the cluster, user and context entries
pub const AGENT_CONTEXT: &str = "agent";

/// Kubeconfig handed to the provisioning agent
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<NamedCluster>,
    pub users: Vec<NamedUser>,
    pub contexts: Vec<NamedContext>,
    pub current_context: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    pub cluster: ClusterConfig,
}

/// No CA data is embedded; the agent pins the CA through the checksum it was
/// installed with.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterConfig {
    pub server: String,
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    pub user: UserConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserConfig {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    pub context: ContextConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContextConfig {
    pub cluster: String,
    pub user: String,
}

impl Kubeconfig {
    /// Single-context kubeconfig authenticating to `server` with `token`
    pub fn for_agent(server: &str, token: &str) -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: vec![NamedCluster {
                name: AGENT_CONTEXT.to_string(),
                cluster: ClusterConfig {
                    server: server.to_string(),
                    insecure_skip_tls_verify: true,
                },
            }],
            users: vec![NamedUser {
                name: AGENT_CONTEXT.to_string(),
                user: UserConfig {
                    token: token.to_string(),
                },
            }],
            contexts: vec![NamedContext {
                name: AGENT_CONTEXT.to_string(),
                context: ContextConfig {
                    cluster: AGENT_CONTEXT.to_string(),
                    user: AGENT_CONTEXT.to_string(),
                },
            }],
            current_context: AGENT_CONTEXT.to_string(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
