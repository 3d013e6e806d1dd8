//! Instruction builders.
//!
//! Windows nodes run the installer through PowerShell, so every environment
//! entry has a POSIX form (`NAME=value`) and a PowerShell form
//! (`$env:NAME="value"`).

use crds::{OneTimeInstruction, PeriodicInstruction, PlanEntry, RKEControlPlane, is_control_plane, is_etcd, is_only_worker, role_or};

use crate::runtime::{distro_data_dir, runtime, runtime_env, supervisor_port};

pub const INSTALL_INSTRUCTION: &str = "install";
pub const REMOVE_MANIFESTS_INSTRUCTION: &str = "remove server manifests";

pub const CAPTURE_ADDRESS_PROBE: &str = "capture-address";
pub const ETCD_NAME_PROBE: &str = "etcd-name";
pub const ETCD_SNAPSHOT_LIST_LOCAL_PROBE: &str = "etcd-snapshot-list-local";
pub const ETCD_SNAPSHOT_LIST_S3_PROBE: &str = "etcd-snapshot-list-s3";
pub const DUMP_KUBECONFIG_PROBE: &str = "dump-kubeconfig";

/// Seconds between two runs of a periodic probe
pub const PROBE_PERIOD_SECONDS: u64 = 600;

/// Whether an instruction with this name is produced by the builder
#[must_use]
pub fn is_generated_instruction(name: &str) -> bool {
    name == INSTALL_INSTRUCTION || name == REMOVE_MANIFESTS_INSTRUCTION
}

/// Whether a periodic probe with this name is produced by the builder
#[must_use]
pub fn is_generated_probe(name: &str) -> bool {
    matches!(
        name,
        CAPTURE_ADDRESS_PROBE
            | ETCD_NAME_PROBE
            | ETCD_SNAPSHOT_LIST_LOCAL_PROBE
            | ETCD_SNAPSHOT_LIST_S3_PROBE
            | DUMP_KUBECONFIG_PROBE
    )
}

/// Formats a single environment entry for the node's shell
#[must_use]
pub fn env_entry(entry: &PlanEntry, name: &str, value: &str) -> String {
    if entry.is_windows() {
        format!("$env:{name}=\"{value}\"")
    } else {
        format!("{name}={value}")
    }
}

/// Leading environment entry carrying the restart stamp
#[must_use]
pub fn restart_stamp_env(entry: &PlanEntry, stamp: &str) -> String {
    env_entry(entry, "RESTART_STAMP", stamp)
}

/// Leading environment entry telling the installer not to start the service
#[must_use]
pub fn skip_start_env(control_plane: &RKEControlPlane, entry: &PlanEntry) -> String {
    let name = format!("INSTALL_{}_SKIP_START", runtime_env(&control_plane.spec.kubernetes_version));
    env_entry(entry, &name, "true")
}

/// The `install` instruction.
///
/// `leading_env` is the mode-specific variable (restart stamp or skip-start)
/// and is always the first entry.
#[must_use]
pub fn install_instruction(
    control_plane: &RKEControlPlane,
    entry: &PlanEntry,
    image: &str,
    leading_env: String,
) -> OneTimeInstruction {
    let runtime_env = runtime_env(&control_plane.spec.kubernetes_version);
    let mut env = vec![leading_env];

    env.extend(
        control_plane
            .spec
            .agent_env_vars
            .iter()
            .filter(|var| !var.value.is_empty())
            .map(|var| env_entry(entry, &var.name, &var.value)),
    );

    let data_dir = distro_data_dir(control_plane);
    let data_dir = if entry.is_windows() {
        format!("c:{data_dir}")
    } else {
        data_dir
    };
    env.push(env_entry(entry, &format!("{runtime_env}_DATA_DIR"), &data_dir));

    if is_only_worker(entry) {
        env.push(env_entry(entry, &format!("INSTALL_{runtime_env}_EXEC"), "agent"));
    }

    let (command, args) = if entry.is_windows() {
        ("powershell.exe", ["-File", "run.ps1"])
    } else {
        ("sh", ["-c", "run.sh"])
    };

    OneTimeInstruction {
        name: INSTALL_INSTRUCTION.to_string(),
        image: image.to_string(),
        env,
        args: args.iter().map(ToString::to_string).collect(),
        command: command.to_string(),
        save_output: false,
    }
}

/// Removes stale distribution-managed manifests before the installer runs.
///
/// Only server nodes carry manifests, and the glob is meaningless without a
/// known runtime.
#[must_use]
pub fn manifest_removal_instruction(control_plane: &RKEControlPlane, entry: &PlanEntry) -> Option<OneTimeInstruction> {
    let runtime = runtime(&control_plane.spec.kubernetes_version);
    if runtime.is_empty() || !role_or(is_etcd, is_control_plane)(entry) {
        return None;
    }

    Some(OneTimeInstruction {
        name: REMOVE_MANIFESTS_INSTRUCTION.to_string(),
        command: "/bin/sh".to_string(),
        args: vec![
            "-c".to_string(),
            format!("rm -rf {}/server/manifests/{runtime}-*.yaml", distro_data_dir(control_plane)),
        ],
        ..Default::default()
    })
}

fn shell_probe(name: &str, script: String) -> PeriodicInstruction {
    PeriodicInstruction {
        name: name.to_string(),
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        period_seconds: PROBE_PERIOD_SECONDS,
        ..Default::default()
    }
}

/// Self-report probes for a node.
///
/// Etcd nodes report their client address, member name and snapshot lists;
/// control-plane nodes report their admin kubeconfig.
#[must_use]
pub fn periodic_instructions(control_plane: &RKEControlPlane, entry: &PlanEntry) -> Vec<PeriodicInstruction> {
    let version = &control_plane.spec.kubernetes_version;
    let runtime = runtime(version);
    let data_dir = distro_data_dir(control_plane);
    let mut probes = Vec::new();

    if is_etcd(entry) {
        probes.push(shell_probe(
            CAPTURE_ADDRESS_PROBE,
            format!(
                "curl -f -L --silent --cacert {data_dir}/server/tls/server-ca.crt https://localhost:{}/db/info | grep 'clientURLs'",
                supervisor_port(version)
            ),
        ));
        probes.push(shell_probe(ETCD_NAME_PROBE, format!("cat {data_dir}/server/db/etcd/name")));
        probes.push(shell_probe(
            ETCD_SNAPSHOT_LIST_LOCAL_PROBE,
            format!("{runtime} etcd-snapshot list --etcd-s3=false 2>/dev/null"),
        ));
        probes.push(shell_probe(
            ETCD_SNAPSHOT_LIST_S3_PROBE,
            format!("{runtime} etcd-snapshot list --etcd-s3 2>/dev/null"),
        ));
    }

    if is_control_plane(entry) {
        probes.push(shell_probe(
            DUMP_KUBECONFIG_PROBE,
            format!("cat /etc/rancher/{runtime}/{runtime}.yaml 2>/dev/null"),
        ));
    }

    probes
}
