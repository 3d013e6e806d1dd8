//! Plan assembly

use std::collections::HashSet;
use std::sync::Arc;

use capr_settings::{SYSTEM_AGENT_INSTALLER_IMAGE, Settings};
use crds::{NodePlan, OneTimeInstruction, PlanEntry, PlanFile, RKEControlPlane, is_control_plane};
use tracing::debug;

use crate::error::PlanError;
use crate::instructions::{
    install_instruction, is_generated_instruction, is_generated_probe, manifest_removal_instruction,
    periodic_instructions, restart_stamp_env, skip_start_env,
};
use crate::manifests::{
    ManifestProvider, addons_file, addons_path, etcd_snapshot_metadata_file, etcd_snapshot_metadata_path,
};
use crate::runtime::runtime;
use crate::stamp::restart_stamp;

/// How the installer should treat the distribution service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    /// Install and (re)start when the restart stamp changes
    #[default]
    Restart,
    /// Install without starting the service
    SkipStart,
}

/// Builds node plans for one control plane's machines.
pub struct Planner {
    settings: Arc<Settings>,
    manifests: Box<dyn ManifestProvider>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").field("settings", &self.settings).finish_non_exhaustive()
    }
}

impl Planner {
    pub fn new(settings: Arc<Settings>, manifests: Box<dyn ManifestProvider>) -> Self {
        Self { settings, manifests }
    }

    /// Installer image for the control plane's distribution and version,
    /// e.g. `rancher/system-agent-installer-rke2:v1.30.4-rke2r1`
    #[must_use]
    pub fn installer_image(&self, control_plane: &RKEControlPlane) -> String {
        let version = &control_plane.spec.kubernetes_version;
        let image = format!(
            "{}{}:{}",
            self.settings.get(SYSTEM_AGENT_INSTALLER_IMAGE),
            runtime(version),
            version.replace('+', "-")
        );
        self.settings.resolve_image(&image)
    }

    /// Install instruction whose stamp covers `plan` as built so far
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Serialization`] if the plan cannot be hashed.
    pub fn install_instruction_with_restart_stamp(
        &self,
        plan: &NodePlan,
        control_plane: &RKEControlPlane,
        entry: &PlanEntry,
    ) -> Result<OneTimeInstruction, PlanError> {
        let image = self.installer_image(control_plane);
        let stamp = restart_stamp(plan, control_plane, &image)?;
        Ok(install_instruction(control_plane, entry, &image, restart_stamp_env(entry, &stamp)))
    }

    /// Install instruction that leaves the service stopped
    #[must_use]
    pub fn install_instruction_with_skip_start(
        &self,
        control_plane: &RKEControlPlane,
        entry: &PlanEntry,
    ) -> OneTimeInstruction {
        let image = self.installer_image(control_plane);
        install_instruction(control_plane, entry, &image, skip_start_env(control_plane, entry))
    }

    /// Manifest files for a node: provider files, the etcd snapshot metadata
    /// ConfigMap and the addons file. Empty for nodes without the
    /// control-plane role.
    ///
    /// # Errors
    ///
    /// Propagates provider and rendering failures.
    pub fn control_plane_manifests(
        &self,
        control_plane: &RKEControlPlane,
        entry: &PlanEntry,
    ) -> Result<Vec<PlanFile>, PlanError> {
        if !is_control_plane(entry) {
            return Ok(Vec::new());
        }

        let mut files = self.manifests.control_plane_manifests(control_plane, entry)?;
        if let Some(metadata) = etcd_snapshot_metadata_file(control_plane)? {
            files.push(metadata);
        }
        files.push(addons_file(control_plane));
        Ok(files)
    }

    /// Paths of every manifest the builder can generate for the control
    /// plane, whether or not this node receives them
    fn generated_paths(&self, control_plane: &RKEControlPlane) -> HashSet<String> {
        let mut paths: HashSet<String> = self.manifests.managed_paths(control_plane).into_iter().collect();
        paths.insert(etcd_snapshot_metadata_path(control_plane));
        paths.insert(addons_path(control_plane));
        paths
    }

    /// Build the plan for one node on top of `existing`.
    ///
    /// Anything the builder can generate is dropped from `existing` first, so
    /// feeding a previous result back in yields the same plan and manifests
    /// that no longer apply disappear.
    ///
    /// # Errors
    ///
    /// Propagates manifest and serialization failures.
    pub fn build_plan(
        &self,
        control_plane: &RKEControlPlane,
        entry: &PlanEntry,
        existing: &NodePlan,
        mode: InstallMode,
    ) -> Result<NodePlan, PlanError> {
        let manifests = self.control_plane_manifests(control_plane, entry)?;
        let mut generated = self.generated_paths(control_plane);
        generated.extend(manifests.iter().map(|f| f.path.clone()));

        let mut plan = NodePlan {
            files: existing
                .files
                .iter()
                .filter(|f| !generated.contains(&f.path))
                .cloned()
                .collect(),
            instructions: existing
                .instructions
                .iter()
                .filter(|i| !is_generated_instruction(&i.name))
                .cloned()
                .collect(),
            periodic_instructions: existing
                .periodic_instructions
                .iter()
                .filter(|p| !is_generated_probe(&p.name))
                .cloned()
                .collect(),
        };
        plan.files.extend(manifests);

        if let Some(removal) = manifest_removal_instruction(control_plane, entry) {
            plan.instructions.push(removal);
        }

        let install = match mode {
            InstallMode::Restart => self.install_instruction_with_restart_stamp(&plan, control_plane, entry)?,
            InstallMode::SkipStart => self.install_instruction_with_skip_start(control_plane, entry),
        };
        plan.instructions.push(install);
        plan.periodic_instructions
            .extend(periodic_instructions(control_plane, entry));

        debug!(
            "Built plan for control plane {}: {} files, {} instructions, {} probes",
            control_plane.metadata.name.as_deref().unwrap_or_default(),
            plan.files.len(),
            plan.instructions.len(),
            plan.periodic_instructions.len()
        );
        Ok(plan)
    }
}
