use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use capr_settings::{SYSTEM_DEFAULT_REGISTRY, Settings};
use crds::{
    CLUSTER_SPEC_ANNOTATION, EnvVar, NodeOs, NodePlan, OneTimeInstruction, PlanEntry, PlanFile, RKEControlPlane,
    RKEControlPlaneSpec,
};

use crate::error::PlanError;
use crate::manifests::{ManifestProvider, NoManifests};
use crate::planner::{InstallMode, Planner};

fn settings() -> Arc<Settings> {
    Arc::new(Settings::with_env(|_| None))
}

fn planner() -> Planner {
    Planner::new(settings(), Box::new(NoManifests))
}

fn control_plane() -> RKEControlPlane {
    let mut cp = RKEControlPlane::new(
        "cp",
        RKEControlPlaneSpec {
            cluster_name: "c1".to_string(),
            kubernetes_version: "v1.30.4+rke2r1".to_string(),
            agent_env_vars: vec![EnvVar::new("HTTPS_PROXY", "http://proxy:3128")],
            additional_manifest: "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: extra\n".to_string(),
            ..Default::default()
        },
    );
    cp.metadata.namespace = Some("fleet-default".to_string());
    cp.metadata.annotations = Some(BTreeMap::from([(
        CLUSTER_SPEC_ANNOTATION.to_string(),
        "{}".to_string(),
    )]));
    cp
}

fn base_plan() -> NodePlan {
    NodePlan {
        files: vec![PlanFile {
            content: STANDARD.encode("token: abc\n"),
            path: "/etc/rancher/rke2/config.yaml.d/50-rancher.yaml".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn all_roles() -> PlanEntry {
    PlanEntry {
        etcd: true,
        control_plane: true,
        worker: true,
        os: NodeOs::Linux,
    }
}

fn stamp_of(plan: &NodePlan) -> String {
    plan.instructions
        .iter()
        .find(|i| i.name == "install")
        .and_then(|i| i.env.first())
        .and_then(|e| e.strip_prefix("RESTART_STAMP="))
        .unwrap()
        .to_string()
}

struct CniManifest;

impl ManifestProvider for CniManifest {
    fn control_plane_manifests(&self, cp: &RKEControlPlane, _entry: &PlanEntry) -> Result<Vec<PlanFile>, PlanError> {
        Ok(vec![PlanFile {
            content: STANDARD.encode("kind: HelmChartConfig\n"),
            path: format!("/var/lib/rancher/rke2/server/manifests/rancher/{}-cni.yaml", cp.spec.cluster_name),
            dynamic: true,
            ..Default::default()
        }])
    }

    fn managed_paths(&self, cp: &RKEControlPlane) -> Vec<String> {
        vec![format!("/var/lib/rancher/rke2/server/manifests/rancher/{}-cni.yaml", cp.spec.cluster_name)]
    }
}

struct FailingManifests;

impl ManifestProvider for FailingManifests {
    fn control_plane_manifests(&self, _cp: &RKEControlPlane, _entry: &PlanEntry) -> Result<Vec<PlanFile>, PlanError> {
        Err(PlanError::ManifestProvider("chart values invalid".to_string()))
    }
}

#[test]
fn test_installer_image() {
    let planner = planner();
    assert_eq!(
        planner.installer_image(&control_plane()),
        "rancher/system-agent-installer-rke2:v1.30.4-rke2r1"
    );
}

#[test]
fn test_installer_image_with_registry() {
    let settings = settings();
    settings.set(SYSTEM_DEFAULT_REGISTRY, "registry.example.com/");
    let planner = Planner::new(settings, Box::new(NoManifests));
    assert_eq!(
        planner.installer_image(&control_plane()),
        "registry.example.com/rancher/system-agent-installer-rke2:v1.30.4-rke2r1"
    );
}

#[test]
fn test_build_plan_order_for_server_node() {
    let plan = Planner::new(settings(), Box::new(CniManifest))
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();

    let paths: Vec<_> = plan.files.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/etc/rancher/rke2/config.yaml.d/50-rancher.yaml",
            "/var/lib/rancher/rke2/server/manifests/rancher/c1-cni.yaml",
            "/var/lib/rancher/rke2/server/manifests/rancher/rke2-etcd-snapshot-extra-metadata.yaml",
            "/var/lib/rancher/rke2/server/manifests/rancher/addons.yaml",
        ]
    );

    let names: Vec<_> = plan.instructions.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["remove server manifests", "install"]);

    let install = &plan.instructions[1];
    assert_eq!(install.image, "rancher/system-agent-installer-rke2:v1.30.4-rke2r1");
    assert!(install.env[0].starts_with("RESTART_STAMP="));
    assert_eq!(install.env[1], "HTTPS_PROXY=http://proxy:3128");
    assert_eq!(install.env[2], "RKE2_DATA_DIR=/var/lib/rancher/rke2");
    assert_eq!(install.env.len(), 3);

    assert_eq!(plan.periodic_instructions.len(), 5);

    let addons = plan.files.last().unwrap();
    assert_eq!(
        STANDARD.decode(&addons.content).unwrap(),
        control_plane().spec.additional_manifest.as_bytes()
    );
}

#[test]
fn test_build_plan_worker() {
    let entry = PlanEntry {
        worker: true,
        ..Default::default()
    };
    let plan = planner()
        .build_plan(&control_plane(), &entry, &base_plan(), InstallMode::Restart)
        .unwrap();

    assert_eq!(plan.files, base_plan().files);
    assert_eq!(plan.instructions.len(), 1);
    assert_eq!(plan.instructions[0].env.last().unwrap(), "INSTALL_RKE2_EXEC=agent");
    assert!(plan.periodic_instructions.is_empty());
}

#[test]
fn test_skip_start_has_no_stamp() {
    let plan = planner()
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::SkipStart)
        .unwrap();
    let install = plan.instructions.iter().find(|i| i.name == "install").unwrap();
    assert_eq!(install.env[0], "INSTALL_RKE2_SKIP_START=true");
    assert!(!install.env.iter().any(|e| e.starts_with("RESTART_STAMP")));
}

#[test]
fn test_stamp_identical_for_identical_inputs() {
    let a = planner()
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    let b = planner()
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    assert_eq!(stamp_of(&a), stamp_of(&b));
    assert_eq!(a, b);
}

#[test]
fn test_rebuilding_from_previous_output_is_stable() {
    let planner = planner();
    let first = planner
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    let second = planner
        .build_plan(&control_plane(), &all_roles(), &first, InstallMode::Restart)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_stamp_changes_with_instruction_bytes() {
    let planner = planner();
    let before = planner
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();

    let mut changed = base_plan();
    changed.instructions.push(OneTimeInstruction {
        name: "etcd-restore".to_string(),
        command: "sh".to_string(),
        ..Default::default()
    });
    let after = planner
        .build_plan(&control_plane(), &all_roles(), &changed, InstallMode::Restart)
        .unwrap();
    assert_ne!(stamp_of(&before), stamp_of(&after));
}

#[test]
fn test_stamp_changes_with_image() {
    let planner = planner();
    let before = planner
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();

    let mut upgraded = control_plane();
    upgraded.spec.kubernetes_version = "v1.30.5+rke2r1".to_string();
    let after = planner
        .build_plan(&upgraded, &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    assert_ne!(stamp_of(&before), stamp_of(&after));
}

#[test]
fn test_stamp_ignores_addons_changes() {
    let planner = planner();
    let before = planner
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();

    let mut edited = control_plane();
    edited.spec.additional_manifest = "kind: ConfigMap\n".to_string();
    let after = planner
        .build_plan(&edited, &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    assert_eq!(stamp_of(&before), stamp_of(&after));
}

#[test]
fn test_manifest_provider_error_propagates() {
    let result = Planner::new(settings(), Box::new(FailingManifests)).build_plan(
        &control_plane(),
        &all_roles(),
        &base_plan(),
        InstallMode::Restart,
    );
    assert!(matches!(result, Err(PlanError::ManifestProvider(_))));
}

const ETCD_METADATA_PATH: &str = "/var/lib/rancher/rke2/server/manifests/rancher/rke2-etcd-snapshot-extra-metadata.yaml";

#[test]
fn test_rebuild_drops_metadata_when_annotation_removed() {
    let planner = planner();
    let first = planner
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    assert!(first.files.iter().any(|f| f.path == ETCD_METADATA_PATH));

    let mut unannotated = control_plane();
    unannotated.metadata.annotations = None;
    let second = planner
        .build_plan(&unannotated, &all_roles(), &first, InstallMode::Restart)
        .unwrap();

    assert!(!second.files.iter().any(|f| f.path == ETCD_METADATA_PATH));
    assert_eq!(second.files.len(), first.files.len() - 1);
}

#[test]
fn test_rebuild_drops_manifests_when_control_plane_role_lost() {
    let planner = Planner::new(settings(), Box::new(CniManifest));
    let first = planner
        .build_plan(&control_plane(), &all_roles(), &base_plan(), InstallMode::Restart)
        .unwrap();
    assert_eq!(first.files.len(), 4);

    let worker = PlanEntry {
        worker: true,
        ..Default::default()
    };
    let second = planner
        .build_plan(&control_plane(), &worker, &first, InstallMode::Restart)
        .unwrap();

    assert_eq!(second.files, base_plan().files);
}
