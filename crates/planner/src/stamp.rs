//! Restart stamp
//!
//! The stamp is handed to the installer as `RESTART_STAMP`. The installer
//! restarts the distribution only when the value differs from the last run,
//! so it must be a pure function of the node's effective configuration.

use crds::{NodePlan, RKEControlPlane};
use sha2::{Digest, Sha256};

use crate::error::PlanError;

/// Hex SHA-256 over the installer image, the instructions already in the plan,
/// every non-dynamic file and the control plane's config generation.
///
/// # Errors
///
/// Returns [`PlanError::Serialization`] if the instructions cannot be serialized.
pub fn restart_stamp(plan: &NodePlan, control_plane: &RKEControlPlane, image: &str) -> Result<String, PlanError> {
    let mut hasher = Sha256::new();
    hasher.update(image.as_bytes());
    hasher.update(serde_json::to_vec(&plan.instructions)?);

    for file in plan.files.iter().filter(|f| !f.dynamic) {
        hasher.update(file.path.as_bytes());
        hasher.update(file.content.as_bytes());
    }

    hasher.update(control_plane.config_generation().to_string().as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{OneTimeInstruction, PlanFile, RKEControlPlaneSpec, RKEControlPlaneStatus};

    fn base_plan() -> NodePlan {
        NodePlan {
            files: vec![
                PlanFile {
                    content: "Y29uZmln".to_string(),
                    path: "/etc/rancher/rke2/config.yaml.d/50-rancher.yaml".to_string(),
                    ..Default::default()
                },
                PlanFile {
                    content: "ZHluYW1pYw==".to_string(),
                    path: "/var/lib/rancher/rke2/server/manifests/rancher/addons.yaml".to_string(),
                    dynamic: true,
                    ..Default::default()
                },
            ],
            instructions: vec![OneTimeInstruction {
                name: "setup".to_string(),
                command: "sh".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn control_plane() -> RKEControlPlane {
        RKEControlPlane::new(
            "cp",
            RKEControlPlaneSpec {
                kubernetes_version: "v1.30.4+rke2r1".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_stamp_is_stable() {
        let a = restart_stamp(&base_plan(), &control_plane(), "img:1").unwrap();
        let b = restart_stamp(&base_plan(), &control_plane(), "img:1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_stamp_ignores_dynamic_files() {
        let mut plan = base_plan();
        let before = restart_stamp(&plan, &control_plane(), "img:1").unwrap();
        plan.files[1].content = "Y2hhbmdlZA==".to_string();
        assert_eq!(restart_stamp(&plan, &control_plane(), "img:1").unwrap(), before);
    }

    #[test]
    fn test_stamp_tracks_inputs() {
        let cp = control_plane();
        let before = restart_stamp(&base_plan(), &cp, "img:1").unwrap();

        assert_ne!(restart_stamp(&base_plan(), &cp, "img:2").unwrap(), before);

        let mut plan = base_plan();
        plan.files[0].content = "Y29uZmlnMg==".to_string();
        assert_ne!(restart_stamp(&plan, &cp, "img:1").unwrap(), before);

        let mut plan = base_plan();
        plan.instructions[0].args.push("-x".to_string());
        assert_ne!(restart_stamp(&plan, &cp, "img:1").unwrap(), before);

        let mut bumped = control_plane();
        bumped.status = Some(RKEControlPlaneStatus {
            config_generation: 2,
            ..Default::default()
        });
        assert_ne!(restart_stamp(&base_plan(), &bumped, "img:1").unwrap(), before);
    }
}
