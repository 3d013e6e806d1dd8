//! Settings errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid injected defaults: {0}")]
    InvalidDefaults(#[from] serde_json::Error),
}
