//! Node identity reconciliation.
//!
//! Once a machine's bootstrap is ready and its node has registered in the
//! downstream cluster, the node's addresses and provider ID are copied onto
//! the provider's infrastructure machine. Infrastructure providers pick the
//! provider ID up from there and propagate it to the Machine.
//!
//! The copy is two writes: `status.addresses` first, then `spec.providerID`.
//! The provider ID is only written after the status write was accepted, and a
//! pass after an interrupted write skips the status step when the stored
//! addresses already match.

use super::Reconciler;
use crate::error::ControllerError;
use capr_client::{KindDescriptor, LabelSelector, StoreError};
use crds::{MACHINE_UID_LABEL, Machine, RKEBootstrap};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::DynamicObject;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

/// Delay before looking again for an infrastructure machine or node that is not ready yet
pub const NODE_WAIT_REQUEUE: Duration = Duration::from_secs(15);

const READY_CONDITION: &str = "Ready";

/// Where a bootstrap's machine stands in the node identity handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Bootstrap is deleting or has not produced its data secret
    NotReady,
    /// Bootstrap carries no Machine owner reference
    NoMachineOwner,
    /// The Machine's infrastructure object does not exist
    InfraMissing,
    /// Infrastructure object exists but is not `Ready`
    AwaitingInfraReady,
    /// No ready node with a provider ID has registered for the machine
    AwaitingNode,
    /// Provider ID is in place on the Machine or the infrastructure object
    Linked,
}

impl LinkState {
    /// Requeue action for this state
    #[must_use]
    pub fn action(self) -> Action {
        match self {
            Self::AwaitingInfraReady | Self::AwaitingNode => Action::requeue(NODE_WAIT_REQUEUE),
            Self::NotReady | Self::NoMachineOwner | Self::InfraMissing | Self::Linked => Action::await_change(),
        }
    }
}

/// Owner reference to a Cluster API Machine
pub fn machine_owner(bootstrap: &RKEBootstrap) -> Option<&OwnerReference> {
    let kind = Machine::kind(&());
    let group = Machine::group(&());
    bootstrap.owner_references().iter().find(|r| {
        r.kind == kind && r.api_version.split_once('/').is_some_and(|(g, _)| g == group)
    })
}

/// True when the object's `Ready` condition is `true`, in any case
pub fn infra_ready(infra: &DynamicObject) -> bool {
    infra
        .data
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(READY_CONDITION))
        .and_then(|c| c.get("status").and_then(Value::as_str))
        .is_some_and(|s| s.eq_ignore_ascii_case("true"))
}

fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == READY_CONDITION && c.status == "True")
}

fn node_provider_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .filter(|id| !id.is_empty())
}

fn infra_provider_id(infra: &DynamicObject) -> &str {
    infra
        .data
        .pointer("/spec/providerID")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Set `data.<section>.<field>`, creating the section when absent
fn set_nested(data: &mut Value, section: &str, field: &str, value: Value) -> Result<(), StoreError> {
    if data.is_null() {
        *data = json!({});
    }
    let root = data
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidObject("object data is not a map".to_string()))?;
    let entry = root.entry(section).or_insert_with(|| json!({}));
    if entry.is_null() {
        *entry = json!({});
    }
    entry
        .as_object_mut()
        .ok_or_else(|| StoreError::InvalidObject(format!("{section} is not a map")))?
        .insert(field.to_string(), value);
    Ok(())
}

impl Reconciler {
    /// Reconcile one RKEBootstrap
    pub async fn reconcile_bootstrap(&self, bootstrap: &RKEBootstrap) -> Result<LinkState, ControllerError> {
        if bootstrap.metadata.deletion_timestamp.is_some() || !bootstrap.is_ready() {
            return Ok(LinkState::NotReady);
        }

        let Some(owner) = machine_owner(bootstrap) else {
            debug!("Bootstrap {} has no Machine owner, skipping", bootstrap.name_any());
            return Ok(LinkState::NoMachineOwner);
        };

        let namespace = bootstrap.namespace().unwrap_or_default();
        let machine = match self.store.get_machine(&namespace, &owner.name).await {
            Ok(machine) => machine,
            Err(e) if e.is_not_found() => {
                return Err(ControllerError::MachineNotFound(format!("{namespace}/{}", owner.name)));
            }
            Err(e) => return Err(e.into()),
        };

        if machine.provider_id().is_some() {
            return Ok(LinkState::Linked);
        }

        let kind = KindDescriptor::from_reference(&machine.spec.infrastructure_ref);
        let infra_name = &machine.spec.infrastructure_ref.name;
        let infra = match self.dynamic.get(&kind, &namespace, infra_name).await {
            Ok(infra) => infra,
            Err(e) if e.is_not_found() => {
                debug!("Infrastructure machine {} {}/{} not found", kind.kind, namespace, infra_name);
                return Ok(LinkState::InfraMissing);
            }
            Err(e) => return Err(e.into()),
        };

        // Writing to an infrastructure machine that is not ready can restart its provisioning
        if !infra_ready(&infra) {
            return Ok(LinkState::AwaitingInfraReady);
        }

        let Some(node) = self.find_node(&namespace, &machine).await else {
            return Ok(LinkState::AwaitingNode);
        };
        let Some(provider_id) = node_provider_id(&node) else {
            return Ok(LinkState::AwaitingNode);
        };

        if infra_provider_id(&infra) == provider_id {
            return Ok(LinkState::Linked);
        }

        info!(
            machine = %machine.name_any(),
            node = %node.name_any(),
            provider_id = %provider_id,
            "Linking infrastructure machine to node"
        );
        self.write_node_identity(&kind, infra, &node, provider_id).await?;
        Ok(LinkState::Linked)
    }

    /// First node labelled with the machine's UID, if it is ready and has a provider ID
    async fn find_node(&self, namespace: &str, machine: &Machine) -> Option<Node> {
        let uid = machine.uid().unwrap_or_default();
        let selector = LabelSelector::new().with(MACHINE_UID_LABEL, uid);
        let cluster = &machine.spec.cluster_name;
        match self.nodes.list_nodes(namespace, cluster, &selector).await {
            Ok(nodes) => {
                let node = nodes.into_iter().next()?;
                if node_ready(&node) && node_provider_id(&node).is_some() {
                    Some(node)
                } else {
                    debug!("Node {} for machine {} is not ready yet", node.name_any(), machine.name_any());
                    None
                }
            }
            Err(e) => {
                debug!(
                    "Searching for node of machine {} in cluster {}/{}: {}",
                    machine.name_any(),
                    namespace,
                    cluster,
                    e
                );
                None
            }
        }
    }

    async fn write_node_identity(
        &self,
        kind: &KindDescriptor,
        mut infra: DynamicObject,
        node: &Node,
        provider_id: &str,
    ) -> Result<(), ControllerError> {
        let addresses = serde_json::to_value(
            node.status
                .as_ref()
                .and_then(|s| s.addresses.clone())
                .unwrap_or_default(),
        )
        .map_err(StoreError::from)?;

        if infra.data.pointer("/status/addresses") != Some(&addresses) {
            set_nested(&mut infra.data, "status", "addresses", addresses)?;
            infra = self.dynamic.update_status(kind, &infra).await?;
            debug!("Wrote node addresses to {} {}", kind.kind, infra.name_any());
        }

        set_nested(&mut infra.data, "spec", "providerID", json!(provider_id))?;
        self.dynamic.update(kind, &infra).await?;
        Ok(())
    }
}
