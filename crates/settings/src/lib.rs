//! CAPR Settings
//!
//! Process configuration keyed by setting name. Every component receives a
//! shared [`Settings`] at construction instead of reading globals.
//!
//! # Precedence
//!
//! 1. Environment variable `CAPR_<NAME>` (name upper-cased, `-` replaced by `_`), when non-empty
//! 2. Value set at runtime through [`Settings::set`] (e.g. the CA bundle picked up from a secret)
//! 3. Default, either compiled in or injected through [`Settings::inject_defaults`]
//!
//! Installer script generation depends on this order, so it must not change.
//!
//! # Example
//!
//! ```
//! use capr_settings::{Settings, SERVER_URL};
//!
//! let settings = Settings::with_env(|key| {
//!     (key == "CAPR_SERVER_URL").then(|| "https://capr.example".to_string())
//! });
//! settings.set(SERVER_URL, "https://ignored.example");
//! assert_eq!(settings.get(SERVER_URL), "https://capr.example");
//! ```

pub mod error;

pub use error::SettingsError;

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// A named setting with its compiled default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Setting {
    pub name: &'static str,
    pub default: &'static str,
}

impl Setting {
    const fn new(name: &'static str, default: &'static str) -> Self {
        Self { name, default }
    }

    /// Environment variable that overrides this setting
    #[must_use]
    pub fn env_key(&self) -> String {
        env_key(self.name)
    }
}

/// `agent-tls-mode` value requiring the agent to verify against the configured CA only
pub const AGENT_TLS_MODE_STRICT: &str = "strict";
/// `agent-tls-mode` value allowing the agent to fall back to the system trust store
pub const AGENT_TLS_MODE_SYSTEM_STORE: &str = "system-store";

pub const SYSTEM_AGENT_INSTALL_SCRIPT: Setting = Setting::new(
    "system-agent-install-script",
    "https://github.com/rancher/system-agent/releases/download/v0.3.10-rc.1/install.sh",
);
pub const WINS_AGENT_INSTALL_SCRIPT: Setting = Setting::new("wins-agent-install-script", "");
pub const SYSTEM_AGENT_VERSION: Setting = Setting::new("system-agent-version", "v0.3.10");
pub const WINS_AGENT_VERSION: Setting = Setting::new("wins-agent-version", "");
pub const SYSTEM_AGENT_INSTALLER_IMAGE: Setting =
    Setting::new("system-agent-installer-image", "rancher/system-agent-installer-");
pub const SERVER_URL: Setting = Setting::new("server-url", "");
/// API server URL handed to agents in their kubeconfig
pub const CAPI_API_SERVER_URL: Setting = Setting::new("capi-api-server-url", "");
pub const UI_PATH: Setting = Setting::new("ui-path", "/usr/share/rancher/ui");
pub const AGENT_TLS_MODE: Setting = Setting::new("agent-tls-mode", AGENT_TLS_MODE_SYSTEM_STORE);
pub const CSI_PROXY_AGENT_VERSION: Setting = Setting::new("csi-proxy-agent-version", "");
pub const CSI_PROXY_AGENT_URL: Setting = Setting::new(
    "csi-proxy-agent-url",
    "https://acs-mirror.azureedge.net/csi-proxy/%[1]s/binaries/csi-proxy-%[1]s.tar.gz",
);
pub const CA_CERTS: Setting = Setting::new("cacerts", "");
pub const INTERNAL_CA_CERTS: Setting = Setting::new("internal-cacerts", "");
pub const SYSTEM_DEFAULT_REGISTRY: Setting = Setting::new("system-default-registry", "");

/// Every known setting
pub const ALL_SETTINGS: &[Setting] = &[
    SYSTEM_AGENT_INSTALL_SCRIPT,
    WINS_AGENT_INSTALL_SCRIPT,
    SYSTEM_AGENT_VERSION,
    WINS_AGENT_VERSION,
    SYSTEM_AGENT_INSTALLER_IMAGE,
    SERVER_URL,
    CAPI_API_SERVER_URL,
    UI_PATH,
    AGENT_TLS_MODE,
    CSI_PROXY_AGENT_VERSION,
    CSI_PROXY_AGENT_URL,
    CA_CERTS,
    INTERNAL_CA_CERTS,
    SYSTEM_DEFAULT_REGISTRY,
];

/// Environment variable name for a setting name
#[must_use]
pub fn env_key(name: &str) -> String {
    format!("CAPR_{}", name.replace('-', "_").to_uppercase())
}

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Settings registry shared by all CAPR components.
pub struct Settings {
    defaults: HashMap<&'static str, String>,
    store: RwLock<HashMap<&'static str, String>>,
    env: EnvLookup,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_process_env()
    }
}

impl Settings {
    /// Settings reading overrides from the process environment
    #[must_use]
    pub fn from_process_env() -> Self {
        Self::with_env(|key| std::env::var(key).ok())
    }

    /// Settings reading overrides through `lookup` (used by tests to avoid touching the process env)
    pub fn with_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let defaults = ALL_SETTINGS
            .iter()
            .map(|s| (s.name, s.default.to_string()))
            .collect();
        Self {
            defaults,
            store: RwLock::new(HashMap::new()),
            env: Arc::new(lookup),
        }
    }

    /// Override compiled defaults from a JSON object of `{"setting-name": "default"}`.
    ///
    /// Unknown names are skipped. Returns how many defaults were replaced.
    pub fn inject_defaults(&mut self, json: &str) -> Result<usize, SettingsError> {
        let injected: HashMap<String, String> = serde_json::from_str(json)?;
        let mut replaced = 0;
        for (name, value) in injected {
            match self.defaults.get_mut(name.as_str()) {
                Some(default) => {
                    debug!("Injected default for setting {}", name);
                    *default = value;
                    replaced += 1;
                }
                None => warn!("Ignoring injected default for unknown setting {}", name),
            }
        }
        Ok(replaced)
    }

    /// Current value of a setting
    #[must_use]
    pub fn get(&self, setting: Setting) -> String {
        if let Some(value) = (self.env)(&setting.env_key()).filter(|v| !v.is_empty()) {
            return value;
        }
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = store.get(setting.name) {
            return value.clone();
        }
        self.default_of(setting).to_string()
    }

    /// Current value of a setting looked up by name
    pub fn get_named(&self, name: &str) -> Result<String, SettingsError> {
        let setting = Self::lookup(name)?;
        Ok(self.get(setting))
    }

    /// Effective default (compiled or injected)
    #[must_use]
    pub fn default_of(&self, setting: Setting) -> &str {
        self.defaults
            .get(setting.name)
            .map_or(setting.default, String::as_str)
    }

    /// True when the current value equals the effective default
    #[must_use]
    pub fn is_default(&self, setting: Setting) -> bool {
        self.get(setting) == self.default_of(setting)
    }

    /// Set a runtime value. An environment override still takes precedence.
    pub fn set(&self, setting: Setting, value: impl Into<String>) {
        let value = value.into();
        debug!("Setting {} updated", setting.name);
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(setting.name, value);
    }

    /// Set a runtime value by name
    pub fn set_named(&self, name: &str, value: impl Into<String>) -> Result<(), SettingsError> {
        let setting = Self::lookup(name)?;
        self.set(setting, value);
        Ok(())
    }

    /// Set a runtime value only if none was set before
    pub fn set_if_unset(&self, setting: Setting, value: impl Into<String>) {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(setting.name)
            .or_insert_with(|| value.into());
    }

    /// Hex SHA-256 of the `cacerts` bundle, empty when unset
    #[must_use]
    pub fn ca_checksum(&self) -> String {
        checksum(&self.get(CA_CERTS))
    }

    /// Hex SHA-256 of the `internal-cacerts` bundle, empty when unset
    #[must_use]
    pub fn internal_ca_checksum(&self) -> String {
        checksum(&self.get(INTERNAL_CA_CERTS))
    }

    /// `cacerts` with a trailing newline, or `None` when unset
    #[must_use]
    pub fn ca_bundle(&self) -> Option<String> {
        let ca = self.get(CA_CERTS);
        if ca.trim().is_empty() {
            return None;
        }
        Some(with_trailing_newline(ca))
    }

    /// True when agents must verify the server strictly against the configured CA
    #[must_use]
    pub fn agent_tls_strict(&self) -> bool {
        self.get(AGENT_TLS_MODE) == AGENT_TLS_MODE_STRICT
    }

    /// Prefix an image reference with `system-default-registry` when configured
    #[must_use]
    pub fn resolve_image(&self, image: &str) -> String {
        let registry = self.get(SYSTEM_DEFAULT_REGISTRY);
        let registry = registry.trim_end_matches('/');
        if registry.is_empty() || image.starts_with(&format!("{registry}/")) {
            image.to_string()
        } else {
            format!("{registry}/{image}")
        }
    }

    fn lookup(name: &str) -> Result<Setting, SettingsError> {
        ALL_SETTINGS
            .iter()
            .copied()
            .find(|s| s.name == name)
            .ok_or_else(|| SettingsError::UnknownSetting(name.to_string()))
    }
}

fn with_trailing_newline(mut value: String) -> String {
    if !value.ends_with('\n') {
        value.push('\n');
    }
    value
}

fn checksum(ca: &str) -> String {
    if ca.is_empty() {
        return String::new();
    }
    let ca = with_trailing_newline(ca.to_string());
    hex::encode(Sha256::digest(ca.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> Settings {
        Settings::with_env(|_| None)
    }

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("system-agent-install-script"), "CAPR_SYSTEM_AGENT_INSTALL_SCRIPT");
        assert_eq!(CA_CERTS.env_key(), "CAPR_CACERTS");
    }

    #[test]
    fn test_precedence_env_over_store_over_default() {
        let settings = Settings::with_env(|key| {
            (key == "CAPR_SERVER_URL").then(|| "https://env.example".to_string())
        });
        assert_eq!(settings.get(SERVER_URL), "https://env.example");
        settings.set(SERVER_URL, "https://store.example");
        assert_eq!(settings.get(SERVER_URL), "https://env.example");

        assert_eq!(settings.get(UI_PATH), "/usr/share/rancher/ui");
        settings.set(UI_PATH, "/opt/ui");
        assert_eq!(settings.get(UI_PATH), "/opt/ui");
    }

    #[test]
    fn test_empty_env_value_does_not_override() {
        let settings = Settings::with_env(|key| (key == "CAPR_UI_PATH").then(String::new));
        settings.set(UI_PATH, "/opt/ui");
        assert_eq!(settings.get(UI_PATH), "/opt/ui");
    }

    #[test]
    fn test_set_if_unset() {
        let settings = no_env();
        settings.set_if_unset(SERVER_URL, "https://first");
        settings.set_if_unset(SERVER_URL, "https://second");
        assert_eq!(settings.get(SERVER_URL), "https://first");
    }

    #[test]
    fn test_inject_defaults() {
        let mut settings = no_env();
        let replaced = settings
            .inject_defaults(r#"{"system-agent-version":"v9.9.9","not-a-setting":"x"}"#)
            .unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(settings.get(SYSTEM_AGENT_VERSION), "v9.9.9");
        assert!(settings.is_default(SYSTEM_AGENT_VERSION));

        assert!(settings.inject_defaults("not json").is_err());
    }

    #[test]
    fn test_named_access() {
        let settings = no_env();
        settings.set_named("cacerts", "CA").unwrap();
        assert_eq!(settings.get_named("cacerts").unwrap(), "CA");
        assert!(matches!(
            settings.get_named("nope"),
            Err(SettingsError::UnknownSetting(_))
        ));
    }

    #[test]
    fn test_ca_checksum_appends_newline() {
        let settings = no_env();
        assert_eq!(settings.ca_checksum(), "");
        assert_eq!(settings.ca_bundle(), None);

        settings.set(CA_CERTS, "abc");
        let with_newline = hex::encode(Sha256::digest(b"abc\n"));
        assert_eq!(settings.ca_checksum(), with_newline);
        assert_eq!(settings.ca_bundle().as_deref(), Some("abc\n"));

        settings.set(CA_CERTS, "abc\n");
        assert_eq!(settings.ca_checksum(), with_newline);
    }

    #[test]
    fn test_resolve_image() {
        let settings = no_env();
        assert_eq!(settings.resolve_image("rancher/x:1"), "rancher/x:1");
        settings.set(SYSTEM_DEFAULT_REGISTRY, "registry.local:5000/");
        assert_eq!(settings.resolve_image("rancher/x:1"), "registry.local:5000/rancher/x:1");
        assert_eq!(
            settings.resolve_image("registry.local:5000/rancher/x:1"),
            "registry.local:5000/rancher/x:1"
        );
    }

    #[test]
    fn test_agent_tls_mode() {
        let settings = no_env();
        assert!(!settings.agent_tls_strict());
        settings.set(AGENT_TLS_MODE, AGENT_TLS_MODE_STRICT);
        assert!(settings.agent_tls_strict());
    }
}
