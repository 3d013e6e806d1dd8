//! Test utilities for unit testing reconcilers
//!
//! Builds a reconciler over in-memory stores and seeds the object graph the
//! node identity handoff walks: Machine <- RKEBootstrap, the Machine's
//! infrastructure object, and downstream Nodes.

#[cfg(test)]
use crate::reconciler::Reconciler;
#[cfg(test)]
use capr_client::mock::helpers::{bootstrap, infra_machine, machine, node};
#[cfg(test)]
use capr_client::{KindDescriptor, MockClusterStore, MockDynamicStore, MockNodeLister};
#[cfg(test)]
use crds::{Machine, RKEBootstrap};
#[cfg(test)]
use std::sync::Arc;

/// Namespace and cluster used by every fixture
#[cfg(test)]
pub const TEST_NAMESPACE: &str = "fleet-default";
#[cfg(test)]
pub const TEST_CLUSTER: &str = "c1";

/// Reconciler plus handles on the mocks behind it
#[cfg(test)]
pub struct TestEnv {
    pub reconciler: Reconciler,
    pub store: MockClusterStore,
    pub dynamic: MockDynamicStore,
    pub nodes: MockNodeLister,
}

#[cfg(test)]
pub fn create_test_env() -> TestEnv {
    let store = MockClusterStore::new();
    let dynamic = MockDynamicStore::new();
    let nodes = MockNodeLister::new();
    let reconciler = Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(dynamic.clone()),
        Arc::new(nodes.clone()),
    );
    TestEnv {
        reconciler,
        store,
        dynamic,
        nodes,
    }
}

#[cfg(test)]
pub fn create_test_infra_kind() -> KindDescriptor {
    KindDescriptor::new("infrastructure.cluster.x-k8s.io/v1beta1", "DockerMachine")
}

/// Machine `name` without a provider ID
#[cfg(test)]
pub fn create_test_machine(name: &str) -> Machine {
    machine(TEST_NAMESPACE, name, TEST_CLUSTER, &create_test_infra_kind())
}

/// Ready bootstrap `b-<machine>` owned by `machine`
#[cfg(test)]
pub fn create_test_bootstrap(machine: &Machine) -> RKEBootstrap {
    let name = machine.metadata.name.clone().unwrap_or_default();
    bootstrap(TEST_NAMESPACE, &format!("b-{name}"), machine)
}

/// Infrastructure object `<machine>-infra` with the given Ready status and provider ID
#[cfg(test)]
pub fn add_test_infra(env: &TestEnv, machine: &Machine, ready: &str, provider_id: Option<&str>) {
    let name = format!("{}-infra", machine.metadata.name.as_deref().unwrap_or_default());
    let kind = create_test_infra_kind();
    env.dynamic
        .add(&kind, infra_machine(&kind, TEST_NAMESPACE, &name, ready, provider_id));
}

/// Node registered for `machine` in the test cluster
#[cfg(test)]
pub fn add_test_node(env: &TestEnv, machine: &Machine, provider_id: Option<&str>, ready: bool) {
    let name = machine.metadata.name.as_deref().unwrap_or_default();
    let uid = machine.metadata.uid.as_deref().unwrap_or_default();
    env.nodes.add_node(
        TEST_NAMESPACE,
        TEST_CLUSTER,
        node(&format!("node-{name}"), uid, provider_id, ready, &[("InternalIP", "10.0.0.5"), ("Hostname", name)]),
    );
}

/// Machine, its bootstrap, a ready infrastructure object and a ready node
/// reporting provider ID `docker://<machine>`
#[cfg(test)]
pub fn create_test_linkable(env: &TestEnv, machine_name: &str) -> (Machine, RKEBootstrap) {
    let m = create_test_machine(machine_name);
    let b = create_test_bootstrap(&m);
    env.store.add_machine(m.clone());
    env.store.add_bootstrap(b.clone());
    add_test_infra(env, &m, "True", None);
    add_test_node(env, &m, Some(&format!("docker://{machine_name}")), true);
    (m, b)
}
