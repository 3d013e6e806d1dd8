//! Machine roles and role predicates.
//!
//! A machine's function in the cluster is a set of boolean capability flags
//! (etcd, control-plane, worker) read from its labels. Callers classify entries
//! with the predicates below and compose them with `role_and`, `role_or` and
//! `role_not` instead of branching on a role type.

use crate::labels::{
    CATTLE_OS_LABEL, CONTROL_PLANE_ROLE_LABEL, ETCD_ROLE_LABEL, WINDOWS_OS, WORKER_ROLE_LABEL,
};
use crate::machine::Machine;
use std::collections::BTreeMap;

/// Operating system family of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeOs {
    #[default]
    Linux,
    Windows,
}

/// A machine as seen by the planner: its role flags and operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanEntry {
    pub etcd: bool,
    pub control_plane: bool,
    pub worker: bool,
    pub os: NodeOs,
}

impl PlanEntry {
    /// Build an entry from machine labels. Role labels count only when set to "true".
    #[must_use]
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let flag = |key: &str| labels.get(key).is_some_and(|v| v == "true");
        let os = match labels.get(CATTLE_OS_LABEL).map(String::as_str) {
            Some(WINDOWS_OS) => NodeOs::Windows,
            _ => NodeOs::Linux,
        };
        Self {
            etcd: flag(ETCD_ROLE_LABEL),
            control_plane: flag(CONTROL_PLANE_ROLE_LABEL),
            worker: flag(WORKER_ROLE_LABEL),
            os,
        }
    }

    /// Build an entry from a machine's labels
    #[must_use]
    pub fn from_machine(machine: &Machine) -> Self {
        machine
            .metadata
            .labels
            .as_ref()
            .map(Self::from_labels)
            .unwrap_or_default()
    }

    /// True for Windows nodes
    #[must_use]
    pub fn is_windows(&self) -> bool {
        self.os == NodeOs::Windows
    }
}

pub fn is_etcd(entry: &PlanEntry) -> bool {
    entry.etcd
}

pub fn is_control_plane(entry: &PlanEntry) -> bool {
    entry.control_plane
}

pub fn is_worker(entry: &PlanEntry) -> bool {
    entry.worker
}

/// Worker with neither etcd nor control-plane role
pub fn is_only_worker(entry: &PlanEntry) -> bool {
    role_and(is_worker, role_not(role_or(is_etcd, is_control_plane)))(entry)
}

pub fn role_and<A, B>(a: A, b: B) -> impl Fn(&PlanEntry) -> bool
where
    A: Fn(&PlanEntry) -> bool,
    B: Fn(&PlanEntry) -> bool,
{
    move |entry| a(entry) && b(entry)
}

pub fn role_or<A, B>(a: A, b: B) -> impl Fn(&PlanEntry) -> bool
where
    A: Fn(&PlanEntry) -> bool,
    B: Fn(&PlanEntry) -> bool,
{
    move |entry| a(entry) || b(entry)
}

pub fn role_not<A>(a: A) -> impl Fn(&PlanEntry) -> bool
where
    A: Fn(&PlanEntry) -> bool,
{
    move |entry| !a(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn test_entry_from_labels() {
        let entry = PlanEntry::from_labels(&labels(&[
            (ETCD_ROLE_LABEL, "true"),
            (CONTROL_PLANE_ROLE_LABEL, "false"),
            (CATTLE_OS_LABEL, "windows"),
        ]));
        assert!(entry.etcd);
        assert!(!entry.control_plane);
        assert!(!entry.worker);
        assert!(entry.is_windows());
    }

    #[test]
    fn test_only_worker() {
        let worker = PlanEntry { worker: true, ..Default::default() };
        let all = PlanEntry { etcd: true, control_plane: true, worker: true, os: NodeOs::Linux };
        let cp_worker = PlanEntry { control_plane: true, worker: true, ..Default::default() };

        assert!(is_only_worker(&worker));
        assert!(!is_only_worker(&all));
        assert!(!is_only_worker(&cp_worker));
        assert!(!is_only_worker(&PlanEntry::default()));
    }

    #[test]
    fn test_combinators() {
        let server = role_or(is_etcd, is_control_plane);
        let etcd_only = role_and(is_etcd, role_not(is_control_plane));

        let etcd = PlanEntry { etcd: true, ..Default::default() };
        let cp = PlanEntry { control_plane: true, ..Default::default() };

        assert!(server(&etcd));
        assert!(server(&cp));
        assert!(etcd_only(&etcd));
        assert!(!etcd_only(&cp));
    }
}
