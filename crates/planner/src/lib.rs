//! Node Plan Builder
//!
//! Computes the [`crds::NodePlan`] a node's system agent executes: the
//! OS-specific install instruction, a restart stamp that only changes when
//! the node's effective configuration changes, periodic self-report probes,
//! and the manifest files rendered onto control-plane nodes.
//!
//! The builder is pure: it reads an `RKEControlPlane`, a [`crds::PlanEntry`]
//! and the plan built so far, and returns a new plan. Persisting the plan into
//! the machine plan secret is the caller's job.

pub mod error;
pub mod instructions;
pub mod manifests;
pub mod planner;
pub mod runtime;
pub mod stamp;

pub use error::PlanError;
pub use manifests::{ManifestProvider, NoManifests};
pub use planner::{InstallMode, Planner};
pub use stamp::restart_stamp;

#[cfg(test)]
mod planner_test;
