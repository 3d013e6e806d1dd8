//! Kubernetes distribution detection.
//!
//! The distribution ("runtime") is inferred from the control plane's
//! Kubernetes version string, e.g. `v1.30.4+rke2r1` or `v1.30.4+k3s1`.

use crds::RKEControlPlane;

pub const RUNTIME_RKE2: &str = "rke2";
pub const RUNTIME_K3S: &str = "k3s";

const RKE2_SUPERVISOR_PORT: u16 = 9345;
const K3S_SUPERVISOR_PORT: u16 = 6443;

/// Runtime name for a Kubernetes version, empty when it cannot be determined
#[must_use]
pub fn runtime(kubernetes_version: &str) -> &'static str {
    if kubernetes_version.contains(RUNTIME_K3S) {
        RUNTIME_K3S
    } else if kubernetes_version.contains(RUNTIME_RKE2) {
        RUNTIME_RKE2
    } else {
        ""
    }
}

/// Runtime name as used in installer environment variables (`RKE2`, `K3S`)
#[must_use]
pub fn runtime_env(kubernetes_version: &str) -> String {
    runtime(kubernetes_version).to_uppercase()
}

/// Port of the runtime supervisor API on server nodes
#[must_use]
pub fn supervisor_port(kubernetes_version: &str) -> u16 {
    match runtime(kubernetes_version) {
        RUNTIME_RKE2 => RKE2_SUPERVISOR_PORT,
        _ => K3S_SUPERVISOR_PORT,
    }
}

/// On-node data directory of the distribution
#[must_use]
pub fn distro_data_dir(control_plane: &RKEControlPlane) -> String {
    let configured = control_plane.spec.data_directories.k8s_distro.trim_end_matches('/');
    if configured.is_empty() {
        format!("/var/lib/rancher/{}", runtime(&control_plane.spec.kubernetes_version))
    } else {
        configured.to_string()
    }
}
