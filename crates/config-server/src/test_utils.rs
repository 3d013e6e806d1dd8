//! Test utilities for plan delivery tests

#[cfg(test)]
use capr_client::mock::helpers::{bootstrap, bootstrap_service_account, machine, token_secret};
#[cfg(test)]
use capr_client::{KindDescriptor, MockClusterStore};
#[cfg(test)]
use crds::RKEBootstrap;

#[cfg(test)]
pub fn create_test_infra_kind() -> KindDescriptor {
    KindDescriptor::new("infrastructure.cluster.x-k8s.io/v1beta1", "DockerMachine")
}

/// Bootstrap token of a machine created by [`create_test_machine`]
#[cfg(test)]
pub fn create_test_bootstrap_token(machine_name: &str) -> String {
    format!("boot-{machine_name}")
}

/// Machine, its ready bootstrap `b-<machine>` and a bootstrap account whose
/// token is [`create_test_bootstrap_token`]
#[cfg(test)]
pub fn create_test_machine(store: &MockClusterStore, namespace: &str, machine_name: &str) -> RKEBootstrap {
    let m = machine(namespace, machine_name, "c1", &create_test_infra_kind());
    let b = bootstrap(namespace, &format!("b-{machine_name}"), &m);
    let account = bootstrap_service_account(namespace, &format!("{machine_name}-boot"), machine_name, &b);
    store.add_secret(token_secret(&account, Some(&create_test_bootstrap_token(machine_name))));
    store.add_service_account(account);
    store.add_bootstrap(b.clone());
    store.add_machine(m);
    b
}
