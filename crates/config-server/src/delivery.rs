//! Plan delivery: turning an authenticated connect request into the agent's
//! plan secret name and kubeconfig.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use capr_client::ClusterStore;
use crds::MACHINE_ID_HEADER;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::DeliveryError;
use crate::kubeconfig::Kubeconfig;
use crate::lookup::{PlanCredentials, PlanLookup};
use crate::machine_id::set_machine_id;
use crate::resolver::Resolver;

/// Default time a connect request may wait for its plan
pub const DEFAULT_PLAN_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Body of a successful connect response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConnection {
    pub namespace: String,
    pub secret_name: String,
    pub kube_config: String,
}

impl AgentConnection {
    /// Pretty-printed JSON with a trailing newline
    pub fn to_json(&self) -> Result<String, DeliveryError> {
        let mut body = serde_json::to_string_pretty(self)?;
        body.push('\n');
        Ok(body)
    }
}

/// Serves connect requests for machines resolved by `resolver`
pub struct PlanDelivery {
    store: Arc<dyn ClusterStore>,
    resolver: Arc<dyn Resolver>,
    plan_wait_timeout: Duration,
}

impl std::fmt::Debug for PlanDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanDelivery")
            .field("plan_wait_timeout", &self.plan_wait_timeout)
            .finish_non_exhaustive()
    }
}

fn machine_id(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MACHINE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
}

impl PlanDelivery {
    pub fn new(store: Arc<dyn ClusterStore>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            store,
            resolver,
            plan_wait_timeout: DEFAULT_PLAN_WAIT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_plan_wait_timeout(mut self, timeout: Duration) -> Self {
        self.plan_wait_timeout = timeout;
        self
    }

    /// Resolve the caller's machine and wait for its plan credentials
    pub async fn find_plan(&self, headers: &HeaderMap) -> Result<PlanCredentials, DeliveryError> {
        if !self.resolver.ready() {
            debug!("Caches not ready, rejecting connect request");
            return Err(DeliveryError::Unauthorized);
        }
        let Some(machine_id) = machine_id(headers) else {
            return Err(DeliveryError::Unauthorized);
        };
        debug!(machine_id = %machine_id, "Connect request");

        let Some(machine) = self.resolver.machine_for_request(headers).await? else {
            return Err(DeliveryError::Unauthorized);
        };
        debug!(namespace = %machine.namespace, machine = %machine.name, "Resolved machine");

        set_machine_id(self.store.as_ref(), &machine.namespace, &machine.name, machine_id).await?;

        let deadline = Instant::now() + self.plan_wait_timeout;
        let credentials = PlanLookup::new(self.store.as_ref(), &machine.namespace, &machine.name, deadline)
            .run()
            .await?;
        info!(
            namespace = %machine.namespace,
            machine = %machine.name,
            machine_id = %machine_id,
            plan_secret = %credentials.plan_secret,
            token_secret = %credentials.token_secret.name_any(),
            "Delivering plan secret to agent"
        );
        Ok(credentials)
    }

    /// Full connect flow: plan lookup, then kubeconfig for the plan account
    pub async fn connect(&self, headers: &HeaderMap) -> Result<AgentConnection, DeliveryError> {
        let credentials = self.find_plan(headers).await?;
        let token = match std::str::from_utf8(credentials.token()) {
            Ok(token) if !token.is_empty() => token,
            _ => return Err(DeliveryError::Unauthorized),
        };

        let server = self.resolver.api_server_url(headers);
        if server.is_empty() {
            return Err(DeliveryError::MissingApiServerUrl);
        }

        Ok(AgentConnection {
            namespace: credentials.token_secret.namespace().unwrap_or_default(),
            secret_name: credentials.plan_secret.clone(),
            kube_config: Kubeconfig::for_agent(&server, token).to_yaml()?,
        })
    }
}
