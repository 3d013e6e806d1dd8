//! Cascading plan credential lookup.
//!
//! Resolving which plan secret and token a machine's agent should receive is
//! a three step pipeline:
//!
//! 1. **Snapshot scan**: list plan accounts for the machine and take the
//!    first one whose token secret is already populated. No watch is opened.
//! 2. **Account watch**: watch plan accounts for the machine. An account
//!    whose token secret exists but is still empty is remembered and handed to
//!    step 3.
//! 3. **Token watch**: watch token secrets in the namespace until the
//!    remembered account's token is populated.
//!
//! Every watch is stopped and drained before its step returns, including when
//! the deadline expires. Dropping a lookup future closes any open watch.

use capr_client::{ClusterStore, LabelSelector, StoreError, Watch};
use crds::{
    MACHINE_NAME_LABEL, ROLE_LABEL, ROLE_PLAN, SERVICE_ACCOUNT_NAME_ANNOTATION, SERVICE_ACCOUNT_TOKEN_KEY,
    token_secret_name,
};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::ResourceExt;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::ownership::plan_account_check;

/// Plan secret name plus the populated token secret of its plan account
#[derive(Debug, Clone)]
pub struct PlanCredentials {
    pub plan_secret: String,
    pub token_secret: Secret,
}

impl PlanCredentials {
    /// The bearer token, empty when the secret carries none
    pub fn token(&self) -> &[u8] {
        token_bytes(&self.token_secret)
    }
}

/// A validated plan account whose token has not been issued yet
#[derive(Debug, Clone)]
pub struct PendingAccount {
    pub name: String,
    pub plan_secret: String,
}

/// Result of one lookup step
#[derive(Debug)]
pub enum PhaseOutcome {
    Found(PlanCredentials),
    NeedsSecretWatch(PendingAccount),
    NotFound,
}

/// State of an account's token secret
#[derive(Debug)]
enum TokenState {
    Populated(Secret),
    Pending,
    Missing,
}

fn token_bytes(secret: &Secret) -> &[u8] {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(SERVICE_ACCOUNT_TOKEN_KEY))
        .map(|t| t.0.as_slice())
        .unwrap_or_default()
}

/// True when the secret carries a non-empty token
pub fn has_token(secret: &Secret) -> bool {
    !token_bytes(secret).is_empty()
}

/// Plan accounts of one machine
pub fn plan_account_selector(machine_name: &str) -> LabelSelector {
    LabelSelector::new()
        .with(MACHINE_NAME_LABEL, machine_name)
        .with(ROLE_LABEL, ROLE_PLAN)
}

/// Plan credential lookup for one machine
#[derive(Debug)]
pub struct PlanLookup<'a, S: ?Sized> {
    store: &'a S,
    namespace: &'a str,
    machine_name: &'a str,
    deadline: Instant,
}

impl<'a, S: ClusterStore + ?Sized> PlanLookup<'a, S> {
    pub fn new(store: &'a S, namespace: &'a str, machine_name: &'a str, deadline: Instant) -> Self {
        Self {
            store,
            namespace,
            machine_name,
            deadline,
        }
    }

    /// Run all three steps in order
    pub async fn run(&self) -> Result<PlanCredentials, DeliveryError> {
        if let PhaseOutcome::Found(credentials) = self.snapshot_scan().await? {
            return Ok(credentials);
        }

        debug!(namespace = %self.namespace, machine = %self.machine_name, "Waiting for plan account");
        let pending = match self.watch_accounts().await? {
            PhaseOutcome::Found(credentials) => return Ok(credentials),
            PhaseOutcome::NeedsSecretWatch(pending) => pending,
            PhaseOutcome::NotFound => return Err(DeliveryError::NoPlanAvailable),
        };

        match self.watch_token(&pending).await? {
            PhaseOutcome::Found(credentials) => Ok(credentials),
            _ => Err(DeliveryError::PlanTimeout),
        }
    }

    async fn token_state(&self, account: &ServiceAccount) -> Result<TokenState, StoreError> {
        let name = token_secret_name(&account.name_any());
        let secret = match self.store.get_token_secret(self.namespace, &name).await {
            Err(e) if e.is_not_found() => {
                debug!(
                    account = %account.name_any(),
                    secret = %name,
                    "Token secret not cached, reading from API server"
                );
                self.store.fetch_token_secret(self.namespace, &name).await
            }
            other => other,
        };
        match secret {
            Ok(secret) if has_token(&secret) => Ok(TokenState::Populated(secret)),
            Ok(_) => Ok(TokenState::Pending),
            Err(e) if e.is_not_found() => Ok(TokenState::Missing),
            Err(e) => Err(e),
        }
    }

    /// Validated plan secret name for an account, logging and skipping on store errors
    async fn checked_plan_secret(&self, account: &ServiceAccount) -> Option<String> {
        match plan_account_check(self.store, self.machine_name, account).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(
                    account = %account.name_any(),
                    machine = %self.machine_name,
                    error = %e,
                    "Failed to check plan account"
                );
                None
            }
        }
    }

    /// Step 1: resolve from the current cache contents without watching
    pub async fn snapshot_scan(&self) -> Result<PhaseOutcome, DeliveryError> {
        let accounts = self
            .store
            .list_service_accounts(self.namespace, &plan_account_selector(self.machine_name))
            .await?;
        debug!(
            namespace = %self.namespace,
            machine = %self.machine_name,
            count = accounts.len(),
            "Listed plan accounts"
        );

        for account in &accounts {
            let Some(plan_secret) = self.checked_plan_secret(account).await else {
                continue;
            };
            match self.token_state(account).await {
                Ok(TokenState::Populated(token_secret)) => {
                    info!(
                        namespace = %self.namespace,
                        machine = %self.machine_name,
                        plan_secret = %plan_secret,
                        "Delivering plan secret"
                    );
                    return Ok(PhaseOutcome::Found(PlanCredentials {
                        plan_secret,
                        token_secret,
                    }));
                }
                Ok(_) => {}
                Err(e) => warn!(account = %account.name_any(), error = %e, "Failed to read token secret"),
            }
        }
        Ok(PhaseOutcome::NotFound)
    }

    /// Step 2: watch plan accounts until one resolves or can be waited on
    pub async fn watch_accounts(&self) -> Result<PhaseOutcome, DeliveryError> {
        let mut watch = self
            .store
            .watch_service_accounts(self.namespace, &plan_account_selector(self.machine_name))
            .await?;
        let outcome = self.consume_accounts(&mut watch).await;
        watch.stop().await;
        outcome
    }

    async fn consume_accounts(&self, watch: &mut Watch<ServiceAccount>) -> Result<PhaseOutcome, DeliveryError> {
        loop {
            let event = match timeout_at(self.deadline, watch.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(PhaseOutcome::NotFound),
                Err(_) => return Err(DeliveryError::PlanTimeout),
            };
            if !event.is_upsert() {
                continue;
            }
            let account = event.object();
            let Some(plan_secret) = self.checked_plan_secret(account).await else {
                continue;
            };
            match self.token_state(account).await {
                Ok(TokenState::Populated(token_secret)) => {
                    info!(
                        namespace = %self.namespace,
                        machine = %self.machine_name,
                        plan_secret = %plan_secret,
                        "Delivering plan secret from account watch"
                    );
                    return Ok(PhaseOutcome::Found(PlanCredentials {
                        plan_secret,
                        token_secret,
                    }));
                }
                Ok(TokenState::Pending) => {
                    debug!(account = %account.name_any(), "Token secret exists but is empty, watching secrets");
                    return Ok(PhaseOutcome::NeedsSecretWatch(PendingAccount {
                        name: account.name_any(),
                        plan_secret,
                    }));
                }
                Ok(TokenState::Missing) => {}
                Err(e) => warn!(account = %account.name_any(), error = %e, "Failed to read token secret"),
            }
        }
    }

    /// Step 3: watch token secrets until the pending account's token is populated
    pub async fn watch_token(&self, pending: &PendingAccount) -> Result<PhaseOutcome, DeliveryError> {
        let mut watch = self.store.watch_token_secrets(self.namespace).await?;
        let outcome = self.consume_secrets(&mut watch, pending).await;
        watch.stop().await;
        outcome
    }

    async fn consume_secrets(
        &self,
        watch: &mut Watch<Secret>,
        pending: &PendingAccount,
    ) -> Result<PhaseOutcome, DeliveryError> {
        loop {
            let event = match timeout_at(self.deadline, watch.next()).await {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(PhaseOutcome::NotFound),
                Err(_) => return Err(DeliveryError::PlanTimeout),
            };
            if !event.is_upsert() {
                continue;
            }
            let secret = event.into_object();
            let bound_to = secret.annotations().get(SERVICE_ACCOUNT_NAME_ANNOTATION);
            if bound_to != Some(&pending.name) || !has_token(&secret) {
                continue;
            }
            info!(
                namespace = %self.namespace,
                machine = %self.machine_name,
                plan_secret = %pending.plan_secret,
                "Delivering plan secret from token watch"
            );
            return Ok(PhaseOutcome::Found(PlanCredentials {
                plan_secret: pending.plan_secret.clone(),
                token_secret: secret,
            }));
        }
    }
}
