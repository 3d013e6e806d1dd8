//! Ownership checks between service accounts, bootstraps and machines.
//!
//! A service account is only trusted for a machine when it is owned by an
//! RKEBootstrap which is itself owned by that Machine.

use capr_client::{ClusterStore, StoreError};
use crds::{Machine, PLAN_SECRET_NAME_LABEL, MACHINE_NAME_LABEL, RKEBootstrap, ROLE_LABEL, ROLE_PLAN};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::debug;

fn refs_of_kind<'a, K: Resource<DynamicType = ()>>(
    refs: &'a [OwnerReference],
) -> impl Iterator<Item = &'a OwnerReference> + 'a {
    let kind = K::kind(&());
    refs.iter().filter(move |r| r.kind == kind)
}

/// True when `bootstrap` is owned by the Machine named `machine_name`
pub fn bootstrap_owned_by_machine(bootstrap: &RKEBootstrap, machine_name: &str) -> bool {
    refs_of_kind::<Machine>(bootstrap.owner_references()).any(|r| r.name == machine_name)
}

/// True when `account` is owned by a bootstrap owned by the Machine named `machine_name`.
///
/// Bootstraps referenced by the account but missing from the store are skipped.
pub async fn is_owned_by_machine<S: ClusterStore + ?Sized>(
    store: &S,
    machine_name: &str,
    account: &ServiceAccount,
) -> Result<bool, StoreError> {
    let namespace = account.namespace().unwrap_or_default();
    for owner in refs_of_kind::<RKEBootstrap>(account.owner_references()) {
        let bootstrap = match store.get_bootstrap(&namespace, &owner.name).await {
            Ok(b) => b,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        };
        if bootstrap.metadata.uid.as_deref() != Some(owner.uid.as_str()) {
            debug!(
                account = %account.name_any(),
                bootstrap = %owner.name,
                "Owner reference UID does not match bootstrap"
            );
            continue;
        }
        if bootstrap_owned_by_machine(&bootstrap, machine_name) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Plan secret named by a plan account, if set and non-empty
pub fn plan_secret_name(account: &ServiceAccount) -> Option<&str> {
    account
        .labels()
        .get(PLAN_SECRET_NAME_LABEL)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

/// Validate a plan-role account for `machine_name` and return its plan secret name.
///
/// Returns `Ok(None)` when the account is not a valid plan account for the machine.
pub async fn plan_account_check<S: ClusterStore + ?Sized>(
    store: &S,
    machine_name: &str,
    account: &ServiceAccount,
) -> Result<Option<String>, StoreError> {
    let labels = account.labels();
    if labels.get(ROLE_LABEL).map(String::as_str) != Some(ROLE_PLAN)
        || labels.get(MACHINE_NAME_LABEL).map(String::as_str) != Some(machine_name)
    {
        debug!(account = %account.name_any(), machine = %machine_name, "Account is not a plan account for machine");
        return Ok(None);
    }
    if !is_owned_by_machine(store, machine_name, account).await? {
        debug!(account = %account.name_any(), machine = %machine_name, "Plan account is not owned by machine");
        return Ok(None);
    }
    Ok(plan_secret_name(account).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capr_client::KindDescriptor;
    use capr_client::MockClusterStore;
    use capr_client::mock::helpers::{bootstrap, bootstrap_service_account, machine, plan_service_account};

    fn infra() -> KindDescriptor {
        KindDescriptor::new("infrastructure.cluster.x-k8s.io/v1beta1", "DockerMachine")
    }

    #[tokio::test]
    async fn test_owned_through_bootstrap() {
        let store = MockClusterStore::new();
        let m1 = machine("ns", "m1", "c1", &infra());
        let b1 = bootstrap("ns", "b1", &m1);
        store.add_bootstrap(b1.clone());

        let sa = plan_service_account("ns", "sa-m1", "m1", "plan-m1", &b1);
        assert!(is_owned_by_machine(&store, "m1", &sa).await.unwrap());
        assert!(!is_owned_by_machine(&store, "m2", &sa).await.unwrap());
        assert_eq!(plan_account_check(&store, "m1", &sa).await.unwrap().as_deref(), Some("plan-m1"));
    }

    #[tokio::test]
    async fn test_missing_bootstrap_is_not_owned() {
        let store = MockClusterStore::new();
        let m1 = machine("ns", "m1", "c1", &infra());
        let b1 = bootstrap("ns", "b1", &m1);

        let sa = plan_service_account("ns", "sa-m1", "m1", "plan-m1", &b1);
        assert!(!is_owned_by_machine(&store, "m1", &sa).await.unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_of_other_machine_rejected() {
        let store = MockClusterStore::new();
        let m2 = machine("ns", "m2", "c1", &infra());
        let b2 = bootstrap("ns", "b2", &m2);
        store.add_bootstrap(b2.clone());

        // Labelled for m1 but owned through m2's bootstrap
        let sa = plan_service_account("ns", "sa-m1", "m1", "plan-m1", &b2);
        assert_eq!(plan_account_check(&store, "m1", &sa).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_uid_mismatch_rejected() {
        let store = MockClusterStore::new();
        let m1 = machine("ns", "m1", "c1", &infra());
        let b1 = bootstrap("ns", "b1", &m1);
        let mut recreated = b1.clone();
        recreated.metadata.uid = Some("uid-b1-recreated".to_string());
        store.add_bootstrap(recreated);

        let sa = plan_service_account("ns", "sa-m1", "m1", "plan-m1", &b1);
        assert!(!is_owned_by_machine(&store, "m1", &sa).await.unwrap());
    }

    #[tokio::test]
    async fn test_plan_check_requires_role_and_secret_name() {
        let store = MockClusterStore::new();
        let m1 = machine("ns", "m1", "c1", &infra());
        let b1 = bootstrap("ns", "b1", &m1);
        store.add_bootstrap(b1.clone());

        let bootstrap_sa = bootstrap_service_account("ns", "sa-boot", "m1", &b1);
        assert_eq!(plan_account_check(&store, "m1", &bootstrap_sa).await.unwrap(), None);

        let no_secret = plan_service_account("ns", "sa-m1", "m1", "", &b1);
        assert_eq!(plan_account_check(&store, "m1", &no_secret).await.unwrap(), None);
    }
}
