//! CAPR Plan Delivery Server
//!
//! Hands provisioning agents the credentials they need to fetch their node
//! plan. An agent calls `/v3/connect/agent` with its bootstrap token and
//! machine ID and receives:
//! - the namespace and name of its plan secret
//! - a kubeconfig authenticated as the machine's plan service account
//!
//! The token is resolved back to a Machine through service account, bootstrap
//! and machine ownership. The plan account may not exist yet when the agent
//! first calls, so the lookup waits on watches until it is issued.
//!
//! The server also serves the agent installer scripts and the CA bundle.

pub mod delivery;
pub mod error;
pub mod installer;
pub mod kubeconfig;
pub mod lookup;
pub mod machine_id;
pub mod ownership;
pub mod plan_secret;
pub mod resolver;
pub mod server;

pub use delivery::{AgentConnection, DEFAULT_PLAN_WAIT_TIMEOUT, PlanDelivery};
pub use error::{DeliveryError, InstallerError};
pub use installer::{Installer, ScriptParams};
pub use lookup::{PhaseOutcome, PlanCredentials, PlanLookup};
pub use resolver::{MachineRef, Resolver, StandaloneResolver};
pub use server::{AppState, router, serve};

#[cfg(test)]
mod test_utils;
