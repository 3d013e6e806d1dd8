//! Controller configuration from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use config_server::DEFAULT_PLAN_WAIT_TIMEOUT;

use crate::error::ControllerError;

pub const DEFAULT_PORT: u16 = 7443;

/// Runtime configuration of the controller binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Public URL agents reach this server at
    pub server_url: String,
    pub port: u16,
    /// API server URL handed to agents; the kube client's cluster URL when unset
    pub api_server_url: Option<String>,
    /// Namespace to watch, all namespaces when unset
    pub namespace: Option<String>,
    pub plan_wait_timeout: Duration,
    /// JSON object of setting defaults
    pub inject_defaults: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to read variables
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = non_empty(lookup("SERVER_URL")).ok_or_else(|| {
            ControllerError::InvalidConfig("SERVER_URL environment variable is required".to_string())
        })?;

        let port = match non_empty(lookup("PORT")) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| ControllerError::InvalidConfig(format!("PORT {raw:?} is not a valid port: {e}")))?,
            None => DEFAULT_PORT,
        };

        let plan_wait_timeout = match non_empty(lookup("PLAN_WAIT_TIMEOUT_SECONDS")) {
            Some(raw) => {
                let seconds = raw.trim().parse::<u64>().map_err(|e| {
                    ControllerError::InvalidConfig(format!("PLAN_WAIT_TIMEOUT_SECONDS {raw:?} is invalid: {e}"))
                })?;
                if seconds == 0 {
                    return Err(ControllerError::InvalidConfig(
                        "PLAN_WAIT_TIMEOUT_SECONDS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_secs(seconds)
            }
            None => DEFAULT_PLAN_WAIT_TIMEOUT,
        };

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            port,
            api_server_url: non_empty(lookup("CAPI_API_SERVER_URL")),
            namespace: non_empty(lookup("WATCH_NAMESPACE")),
            plan_wait_timeout,
            inject_defaults: non_empty(lookup("CAPR_INJECT_DEFAULTS")),
        })
    }

    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}
