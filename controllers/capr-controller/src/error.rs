//! Controller-specific error types.
//!
//! Errors from the object store and the Kubernetes client are wrapped here so
//! reconcilers and the supervisor share one type.

use capr_client::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the CAPR controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Kubernetes client configuration could not be inferred
    #[error("Kubernetes config error: {0}")]
    KubeConfig(#[from] kube::config::InferConfigError),

    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Owning Machine could not be loaded
    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    /// Resource watch or server task failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
