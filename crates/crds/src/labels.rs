//! Well-known labels, annotations and wire constants.
//!
//! These values are shared with the remote provisioning agent and with the
//! external controller that generates machines, bootstraps and service accounts,
//! so they must not change.

/// Path the provisioning agent calls to obtain its plan credentials.
pub const CONNECT_AGENT_PATH: &str = "/v3/connect/agent";

/// Header carrying the agent's opaque machine identifier.
pub const MACHINE_ID_HEADER: &str = "X-Cattle-Id";

/// Machine label holding the agent-reported machine identifier.
pub const MACHINE_ID_LABEL: &str = "rke.cattle.io/machine-id";

/// Service account label naming the machine the account belongs to.
pub const MACHINE_NAME_LABEL: &str = "rke.cattle.io/machine-name";

/// Node label holding the UID of the owning machine.
pub const MACHINE_UID_LABEL: &str = "rke.cattle.io/machine";

/// Service account label describing what the account is used for.
pub const ROLE_LABEL: &str = "rke.cattle.io/service-account-role";

/// `ROLE_LABEL` value for plan-fetch service accounts.
pub const ROLE_PLAN: &str = "plan";

/// `ROLE_LABEL` value for bootstrap service accounts.
pub const ROLE_BOOTSTRAP: &str = "bootstrap";

/// Service account label naming the secret holding the machine plan.
pub const PLAN_SECRET_NAME_LABEL: &str = "rke.cattle.io/plan-secret-name";

/// Machine role labels. A value of `"true"` enables the role.
pub const ETCD_ROLE_LABEL: &str = "rke.cattle.io/etcd-role";
/// See [`ETCD_ROLE_LABEL`].
pub const CONTROL_PLANE_ROLE_LABEL: &str = "rke.cattle.io/control-plane-role";
/// See [`ETCD_ROLE_LABEL`].
pub const WORKER_ROLE_LABEL: &str = "rke.cattle.io/worker-role";

/// Machine label selecting the node operating system.
pub const CATTLE_OS_LABEL: &str = "cattle.io/os";

/// `CATTLE_OS_LABEL` value for Windows nodes.
pub const WINDOWS_OS: &str = "windows";

/// Control plane annotation holding the serialized cluster specification.
pub const CLUSTER_SPEC_ANNOTATION: &str = "rke.cattle.io/cluster-spec";

/// ConfigMap key under which the cluster specification is stored for etcd snapshots.
pub const ETCD_SNAPSHOT_CONFIG_MAP_KEY: &str = "provisioning-cluster-spec";

/// Secret annotation naming the service account a token belongs to.
pub const SERVICE_ACCOUNT_NAME_ANNOTATION: &str = "kubernetes.io/service-account.name";

/// Secret annotation holding the UID of the service account a token belongs to.
pub const SERVICE_ACCOUNT_UID_ANNOTATION: &str = "kubernetes.io/service-account.uid";

/// Secret type for service account tokens.
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Data key holding the bearer token in a service account token secret.
pub const SERVICE_ACCOUNT_TOKEN_KEY: &str = "token";

/// Data key holding the serialized plan in a machine plan secret.
pub const PLAN_SECRET_DATA_KEY: &str = "plan";

/// Name of the token secret bound to a service account.
#[must_use]
pub fn token_secret_name(service_account: &str) -> String {
    format!("{service_account}-token")
}
