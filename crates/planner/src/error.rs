//! Planner errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Manifest rendering error: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("Manifest provider error: {0}")]
    ManifestProvider(String),
}
