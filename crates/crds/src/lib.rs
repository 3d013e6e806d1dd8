//! CAPR CRD Definitions
//!
//! Kubernetes resource types shared by the plan delivery server, the node plan
//! builder and the node identity reconciler:
//! - `Machine`: the Cluster API machine record (consumed, never owned)
//! - `RKEBootstrap`: per-machine bootstrap/plan readiness gate
//! - `RKEControlPlane`: desired cluster configuration consumed by the planner
//!
//! Also carries the node plan wire types, the well-known labels and annotations,
//! and the role predicates used to classify machines.

pub mod labels;
pub mod machine;
pub mod plan;
pub mod references;
pub mod rke_bootstrap;
pub mod rke_control_plane;
pub mod roles;

pub use labels::*;
pub use machine::*;
pub use plan::*;
pub use references::*;
pub use rke_bootstrap::*;
pub use rke_control_plane::*;
pub use roles::*;
