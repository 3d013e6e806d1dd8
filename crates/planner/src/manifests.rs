//! Manifest files rendered onto control-plane nodes.
//!
//! The distribution picks up anything under `<data dir>/server/manifests`, so
//! these files are how cluster add-ons reach a freshly provisioned control
//! plane. All of them are dynamic: rewriting them never bumps the restart stamp.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use crds::{CLUSTER_SPEC_ANNOTATION, ETCD_SNAPSHOT_CONFIG_MAP_KEY, PlanEntry, PlanFile, RKEControlPlane};
use serde_json::json;
use tracing::debug;

use crate::error::PlanError;
use crate::runtime::{distro_data_dir, runtime};

/// Supplies the core add-on manifests (CNI, cloud provider, ...) for a node.
///
/// Rendering of those manifests belongs to the generating controller; the
/// builder only orders them ahead of its own files.
pub trait ManifestProvider: Send + Sync {
    /// Files to place on a control-plane node, in order
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::ManifestProvider`] when a manifest cannot be rendered.
    fn control_plane_manifests(
        &self,
        control_plane: &RKEControlPlane,
        entry: &PlanEntry,
    ) -> Result<Vec<PlanFile>, PlanError>;

    /// Every path this provider may ever write for the control plane.
    ///
    /// Files at these paths are removed from previous plans even on rounds
    /// where the provider no longer renders them.
    fn managed_paths(&self, _control_plane: &RKEControlPlane) -> Vec<String> {
        Vec::new()
    }
}

/// Provider that contributes no manifests of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoManifests;

impl ManifestProvider for NoManifests {
    fn control_plane_manifests(
        &self,
        _control_plane: &RKEControlPlane,
        _entry: &PlanEntry,
    ) -> Result<Vec<PlanFile>, PlanError> {
        Ok(Vec::new())
    }
}

/// Directory the distribution loads rancher-managed manifests from
fn rancher_manifest_dir(control_plane: &RKEControlPlane) -> String {
    format!("{}/server/manifests/rancher", distro_data_dir(control_plane))
}

/// Path of the etcd snapshot extra-metadata manifest
#[must_use]
pub fn etcd_snapshot_metadata_path(control_plane: &RKEControlPlane) -> String {
    format!(
        "{}/{}-etcd-snapshot-extra-metadata.yaml",
        rancher_manifest_dir(control_plane),
        runtime(&control_plane.spec.kubernetes_version)
    )
}

/// Path of the cluster addons manifest
#[must_use]
pub fn addons_path(control_plane: &RKEControlPlane) -> String {
    format!("{}/addons.yaml", rancher_manifest_dir(control_plane))
}

/// ConfigMap carrying the serialized cluster spec into etcd snapshots.
///
/// Returns `None` when the control plane has no cluster-spec annotation.
///
/// # Errors
///
/// Returns [`PlanError::Render`] if the ConfigMap cannot be serialized.
pub fn etcd_snapshot_metadata_file(control_plane: &RKEControlPlane) -> Result<Option<PlanFile>, PlanError> {
    let Some(cluster_spec) = control_plane
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(CLUSTER_SPEC_ANNOTATION))
    else {
        debug!(
            "Control plane {} has no {} annotation, omitting etcd snapshot metadata manifest",
            control_plane.metadata.name.as_deref().unwrap_or_default(),
            CLUSTER_SPEC_ANNOTATION
        );
        return Ok(None);
    };

    let config_map = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": format!("{}-etcd-snapshot-extra-metadata", runtime(&control_plane.spec.kubernetes_version)),
            "namespace": "kube-system",
        },
        "data": {
            ETCD_SNAPSHOT_CONFIG_MAP_KEY: cluster_spec,
        },
    });
    let rendered = serde_yaml::to_string(&config_map)?;

    Ok(Some(PlanFile {
        content: STANDARD.encode(rendered),
        path: etcd_snapshot_metadata_path(control_plane),
        dynamic: true,
        minor: true,
        ..Default::default()
    }))
}

/// Addons file holding `spec.additionalManifest`, rendered even when empty so
/// removed addons are cleared on the node.
#[must_use]
pub fn addons_file(control_plane: &RKEControlPlane) -> PlanFile {
    PlanFile {
        content: STANDARD.encode(&control_plane.spec.additional_manifest),
        path: addons_path(control_plane),
        dynamic: true,
        ..Default::default()
    }
}
