//! Fixture builders for the object graph a machine's plan delivery walks:
//! Machine <- RKEBootstrap <- ServiceAccount <- token Secret.

use crds::{
    MACHINE_NAME_LABEL, MACHINE_UID_LABEL, Machine, MachineSpec, ObjectReference, PLAN_SECRET_NAME_LABEL,
    RKEBootstrap, RKEBootstrapSpec, RKEBootstrapStatus, ROLE_BOOTSTRAP, ROLE_LABEL, ROLE_PLAN,
    SERVICE_ACCOUNT_NAME_ANNOTATION, SERVICE_ACCOUNT_TOKEN_KEY, SERVICE_ACCOUNT_TOKEN_TYPE,
    SERVICE_ACCOUNT_UID_ANNOTATION, token_secret_name,
};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus, Secret, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::api::ObjectMeta;
use kube::core::{ApiResource, DynamicObject};
use serde_json::json;
use std::collections::BTreeMap;

use crate::store_trait::KindDescriptor;

/// Controller owner reference pointing at `owner`
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.meta().name.clone().unwrap_or_default(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn meta(namespace: &str, name: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(uid.to_string()),
        ..Default::default()
    }
}

/// Machine in `cluster` backed by an infrastructure object of `infra_kind`
pub fn machine(namespace: &str, name: &str, cluster: &str, infra: &KindDescriptor) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            cluster_name: cluster.to_string(),
            infrastructure_ref: ObjectReference::new(infra.api_version.clone(), infra.kind.clone(), format!("{name}-infra")),
            ..Default::default()
        },
    );
    machine.metadata = meta(namespace, name, &format!("uid-{name}"));
    machine
}

/// Ready bootstrap owned by `machine`
pub fn bootstrap(namespace: &str, name: &str, machine: &Machine) -> RKEBootstrap {
    let mut bootstrap = RKEBootstrap::new(
        name,
        RKEBootstrapSpec {
            cluster_name: machine.spec.cluster_name.clone(),
            ..Default::default()
        },
    );
    bootstrap.metadata = meta(namespace, name, &format!("uid-{name}"));
    bootstrap.metadata.owner_references = Some(vec![owner_reference(machine)]);
    bootstrap.status = Some(RKEBootstrapStatus {
        ready: true,
        data_secret_name: Some(format!("{name}-data")),
    });
    bootstrap
}

fn service_account(
    namespace: &str,
    name: &str,
    machine_name: &str,
    role: &str,
    bootstrap: &RKEBootstrap,
) -> ServiceAccount {
    let mut metadata = meta(namespace, name, &format!("uid-{name}"));
    metadata.labels = Some(BTreeMap::from([
        (MACHINE_NAME_LABEL.to_string(), machine_name.to_string()),
        (ROLE_LABEL.to_string(), role.to_string()),
    ]));
    metadata.owner_references = Some(vec![owner_reference(bootstrap)]);
    ServiceAccount {
        metadata,
        ..Default::default()
    }
}

/// Plan-role service account for `machine_name`, owned by `bootstrap`
pub fn plan_service_account(
    namespace: &str,
    name: &str,
    machine_name: &str,
    plan_secret: &str,
    bootstrap: &RKEBootstrap,
) -> ServiceAccount {
    let mut account = service_account(namespace, name, machine_name, ROLE_PLAN, bootstrap);
    if let Some(labels) = account.metadata.labels.as_mut() {
        labels.insert(PLAN_SECRET_NAME_LABEL.to_string(), plan_secret.to_string());
    }
    account
}

/// Bootstrap-role service account for `machine_name`, owned by `bootstrap`
pub fn bootstrap_service_account(
    namespace: &str,
    name: &str,
    machine_name: &str,
    bootstrap: &RKEBootstrap,
) -> ServiceAccount {
    service_account(namespace, name, machine_name, ROLE_BOOTSTRAP, bootstrap)
}

/// Token secret `<account>-token` bound to `account`; `None` leaves the token unpopulated
pub fn token_secret(account: &ServiceAccount, token: Option<&str>) -> Secret {
    let account_name = account.metadata.name.clone().unwrap_or_default();
    let name = token_secret_name(&account_name);
    let mut metadata = meta(
        account.metadata.namespace.as_deref().unwrap_or_default(),
        &name,
        &format!("uid-{name}"),
    );
    metadata.annotations = Some(BTreeMap::from([
        (SERVICE_ACCOUNT_NAME_ANNOTATION.to_string(), account_name),
        (
            SERVICE_ACCOUNT_UID_ANNOTATION.to_string(),
            account.metadata.uid.clone().unwrap_or_default(),
        ),
    ]));
    Secret {
        metadata,
        type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
        data: token.map(|t| {
            BTreeMap::from([(
                SERVICE_ACCOUNT_TOKEN_KEY.to_string(),
                ByteString(t.as_bytes().to_vec()),
            )])
        }),
        ..Default::default()
    }
}

/// Downstream node labelled with the owning machine's UID
pub fn node(name: &str, machine_uid: &str, provider_id: Option<&str>, ready: bool, addresses: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(MACHINE_UID_LABEL.to_string(), machine_uid.to_string())])),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: provider_id.map(str::to_string),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            addresses: Some(
                addresses
                    .iter()
                    .map(|(type_, address)| NodeAddress {
                        type_: (*type_).to_string(),
                        address: (*address).to_string(),
                    })
                    .collect(),
            ),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Infrastructure machine with a `Ready` condition and optional provider ID
pub fn infra_machine(kind: &KindDescriptor, namespace: &str, name: &str, ready: &str, provider_id: Option<&str>) -> DynamicObject {
    let resource: ApiResource = kind.api_resource();
    let mut spec = json!({});
    if let Some(id) = provider_id {
        spec["providerID"] = json!(id);
    }
    DynamicObject::new(name, &resource).within(namespace).data(json!({
        "spec": spec,
        "status": {
            "conditions": [{ "type": "Ready", "status": ready }],
        },
    }))
}
