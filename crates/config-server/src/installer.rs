//! System agent installer scripts.
//!
//! The agent install scripts are wrapped with the environment an agent needs
//! to find this server: its URL, the CA checksum and optionally a token.

use std::path::PathBuf;
use std::sync::Arc;

use capr_settings::{
    CSI_PROXY_AGENT_URL, CSI_PROXY_AGENT_VERSION, SERVER_URL, SYSTEM_AGENT_INSTALL_SCRIPT, SYSTEM_AGENT_VERSION,
    Setting, Settings, UI_PATH, WINS_AGENT_INSTALL_SCRIPT, WINS_AGENT_VERSION,
};
use crds::EnvVar;
use tracing::debug;

use crate::error::InstallerError;

/// Route serving the Linux installer
pub const SYSTEM_AGENT_INSTALL_PATH: &str = "/system-agent-install.sh";
/// Route serving the Windows installer
pub const WINS_AGENT_INSTALL_PATH: &str = "/wins-agent-install.ps1";

const STRICT_VERIFY: &str = "STRICT_VERIFY";
const DEFAULT_CSI_PROXY_VERSION: &str = "v1.0.0";

/// Per-request script parameters
#[derive(Debug, Clone, Default)]
pub struct ScriptParams {
    pub server_url: String,
    pub ca_checksum: String,
    pub token: String,
    pub env_vars: Vec<EnvVar>,
    pub data_dir: String,
}

/// Builds installer scripts from the configured script sources
#[derive(Debug, Clone)]
pub struct Installer {
    settings: Arc<Settings>,
    http: reqwest::Client,
}

impl Installer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    /// Local copies of a script, checked in order
    fn local_candidates(&self, route: &str) -> Vec<PathBuf> {
        let file = route.trim_start_matches('/');
        vec![
            PathBuf::from(self.settings.get(UI_PATH)).join("assets").join(file),
            PathBuf::from(".").join(file),
        ]
    }

    /// Script body: a local copy when the source setting is untouched, else the setting's URL
    async fn script_body(&self, setting: Setting, route: &str) -> Result<String, InstallerError> {
        let url = self.settings.get(setting);
        if self.settings.is_default(setting) {
            for path in self.local_candidates(route) {
                match tokio::fs::read(&path).await {
                    Ok(body) => {
                        debug!(path = %path.display(), "Using local install script");
                        return Ok(String::from_utf8(body)?);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => debug!(path = %path.display(), error = %e, "Failed to read local install script"),
                }
            }
            debug!(url = %url, "No local install script, fetching");
        }
        if url.is_empty() {
            return Err(InstallerError::NoSource(setting.name.to_string()));
        }

        let fetch = |source: reqwest::Error| InstallerError::Fetch {
            url: url.clone(),
            source,
        };
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch)?;
        response.text().await.map_err(fetch)
    }

    /// POSIX shell installer
    pub async fn linux_script(&self, params: &ScriptParams) -> Result<String, InstallerError> {
        let data = self
            .script_body(SYSTEM_AGENT_INSTALL_SCRIPT, SYSTEM_AGENT_INSTALL_PATH)
            .await?;

        let mut env_vars = params.env_vars.clone();
        if !env_vars.iter().any(|e| e.name == STRICT_VERIFY) {
            env_vars.push(EnvVar::new(STRICT_VERIFY, self.settings.agent_tls_strict().to_string()));
        }
        let env: String = env_vars
            .iter()
            .filter(|e| !e.value.is_empty())
            .map(|e| format!("{}=\"{}\"\n", e.name, e.value))
            .collect();

        let binary_url = if !self.settings.get(SYSTEM_AGENT_VERSION).is_empty() && !params.server_url.is_empty() {
            format!("CATTLE_AGENT_BINARY_BASE_URL=\"{}/assets\"", params.server_url)
        } else {
            String::new()
        };
        let configured_server = self.settings.get(SERVER_URL);
        let server = if configured_server.is_empty() {
            String::new()
        } else {
            format!("CATTLE_SERVER={configured_server}")
        };
        let ca = if params.ca_checksum.is_empty() {
            String::new()
        } else {
            format!("CATTLE_CA_CHECKSUM=\"{}\"", params.ca_checksum)
        };
        let token = if params.token.is_empty() {
            String::new()
        } else {
            format!("CATTLE_ROLE_NONE=true\nCATTLE_TOKEN=\"{}\"", params.token)
        };

        Ok(format!(
            "#!/usr/bin/env sh\n{env}\n{binary_url}\n{server}\n{ca}\n{token}\n\n{data}\n"
        ))
    }

    /// PowerShell installer
    pub async fn windows_script(&self, params: &ScriptParams) -> Result<String, InstallerError> {
        let data = self
            .script_body(WINS_AGENT_INSTALL_SCRIPT, WINS_AGENT_INSTALL_PATH)
            .await?;

        let binary_url = if !self.settings.get(WINS_AGENT_VERSION).is_empty() && !params.server_url.is_empty() {
            format!("$env:CATTLE_AGENT_BINARY_BASE_URL=\"{}/assets\"", params.server_url)
        } else {
            String::new()
        };

        let mut csi_proxy_url = self.settings.get(CSI_PROXY_AGENT_URL);
        let mut csi_proxy_version = DEFAULT_CSI_PROXY_VERSION.to_string();
        let configured_version = self.settings.get(CSI_PROXY_AGENT_VERSION);
        if !configured_version.is_empty() {
            csi_proxy_version = configured_version;
            if !params.server_url.is_empty() {
                csi_proxy_url = format!("{}/assets/csi-proxy-%[1]s.tar.gz", params.server_url);
            }
        }

        let ca = if params.ca_checksum.is_empty() {
            String::new()
        } else {
            format!("$env:CATTLE_CA_CHECKSUM=\"{}\"", params.ca_checksum)
        };
        let token = if params.token.is_empty() {
            String::new()
        } else {
            format!("$env:CATTLE_ROLE_NONE=\"true\"\n$env:CATTLE_TOKEN=\"{}\"", params.token)
        };
        let env: String = params
            .env_vars
            .iter()
            .filter(|e| !e.value.is_empty())
            .map(|e| format!("$env:{}=\"{}\"\n", e.name, e.value))
            .collect();
        let server = if params.server_url.is_empty() {
            String::new()
        } else {
            format!("$env:CATTLE_SERVER=\"{}\"", params.server_url)
        };
        let strict_verify = self.settings.agent_tls_strict();
        let data_dir = &params.data_dir;

        Ok(format!(
            "{data}\n\n{env}\n{binary_url}\n{server}\n{ca}\n{token}\n\n\
             # Enables CSI Proxy\n\
             $env:CSI_PROXY_URL = \"{csi_proxy_url}\"\n\
             $env:CSI_PROXY_VERSION = \"{csi_proxy_version}\"\n\
             $env:CSI_PROXY_KUBELET_PATH = \"C:{data_dir}/bin/kubelet.exe\"\n\
             $env:STRICT_VERIFY = \"{strict_verify}\"\n\
             \n\
             Invoke-WinsInstaller @PSBoundParameters\n\
             exit 0\n"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capr_settings::AGENT_TLS_MODE;

    /// Settings whose script sources point at a directory holding both scripts
    async fn settings_with_local_scripts(tag: &str) -> Settings {
        let dir = std::env::temp_dir().join(format!("capr-installer-{}-{tag}", std::process::id()));
        let assets = dir.join("assets");
        tokio::fs::create_dir_all(&assets).await.unwrap();
        tokio::fs::write(assets.join("system-agent-install.sh"), "echo linux").await.unwrap();
        tokio::fs::write(assets.join("wins-agent-install.ps1"), "Write-Host windows").await.unwrap();

        let settings = Settings::with_env(|_| None);
        settings.set(UI_PATH, dir.display().to_string());
        settings
    }

    fn params(server_url: &str) -> ScriptParams {
        ScriptParams {
            server_url: server_url.to_string(),
            ca_checksum: "abc123".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_linux_script_from_local_file() {
        let settings = settings_with_local_scripts("linux").await;
        settings.set(SERVER_URL, "https://capr.example.com");
        let installer = Installer::new(Arc::new(settings));

        let script = installer.linux_script(&params("https://capr.example.com")).await.unwrap();
        assert_eq!(
            script,
            "#!/usr/bin/env sh\n\
             STRICT_VERIFY=\"false\"\n\
             \n\
             CATTLE_AGENT_BINARY_BASE_URL=\"https://capr.example.com/assets\"\n\
             CATTLE_SERVER=https://capr.example.com\n\
             CATTLE_CA_CHECKSUM=\"abc123\"\n\
             \n\
             \n\
             echo linux\n"
        );
    }

    #[tokio::test]
    async fn test_linux_script_strict_and_token() {
        let settings = settings_with_local_scripts("strict").await;
        settings.set(AGENT_TLS_MODE, "strict");
        let installer = Installer::new(Arc::new(settings));

        let script = installer
            .linux_script(&ScriptParams {
                token: "t0k".to_string(),
                env_vars: vec![EnvVar::new("HTTP_PROXY", "http://proxy:3128"), EnvVar::new("EMPTY", "")],
                ..params("")
            })
            .await
            .unwrap();
        assert!(script.contains("HTTP_PROXY=\"http://proxy:3128\"\nSTRICT_VERIFY=\"true\"\n"));
        assert!(!script.contains("EMPTY"));
        assert!(script.contains("CATTLE_ROLE_NONE=true\nCATTLE_TOKEN=\"t0k\""));
        assert!(!script.contains("CATTLE_AGENT_BINARY_BASE_URL"));
        assert!(!script.contains("CATTLE_SERVER"));
    }

    #[tokio::test]
    async fn test_user_strict_verify_kept() {
        let settings = settings_with_local_scripts("user-strict").await;
        settings.set(AGENT_TLS_MODE, "strict");
        let installer = Installer::new(Arc::new(settings));

        let script = installer
            .linux_script(&ScriptParams {
                env_vars: vec![EnvVar::new(STRICT_VERIFY, "false")],
                ..params("")
            })
            .await
            .unwrap();
        assert_eq!(script.matches("STRICT_VERIFY").count(), 1);
        assert!(script.contains("STRICT_VERIFY=\"false\""));
    }

    #[tokio::test]
    async fn test_windows_script() {
        let settings = settings_with_local_scripts("windows").await;
        let installer = Installer::new(Arc::new(settings));

        let script = installer.windows_script(&params("https://capr.example.com")).await.unwrap();
        assert!(script.starts_with("Write-Host windows\n\n"));
        assert!(script.contains("$env:CATTLE_SERVER=\"https://capr.example.com\"\n"));
        assert!(script.contains("$env:CATTLE_CA_CHECKSUM=\"abc123\"\n"));
        assert!(script.contains("$env:CSI_PROXY_VERSION = \"v1.0.0\"\n"));
        assert!(script.contains(
            "$env:CSI_PROXY_URL = \"https://acs-mirror.azureedge.net/csi-proxy/%[1]s/binaries/csi-proxy-%[1]s.tar.gz\""
        ));
        assert!(script.contains("$env:CSI_PROXY_KUBELET_PATH = \"C:/bin/kubelet.exe\""));
        assert!(script.contains("$env:STRICT_VERIFY = \"false\""));
        assert!(script.ends_with("Invoke-WinsInstaller @PSBoundParameters\nexit 0\n"));
        assert!(!script.contains("CATTLE_AGENT_BINARY_BASE_URL"));
    }

    #[tokio::test]
    async fn test_windows_csi_proxy_served_locally() {
        let settings = settings_with_local_scripts("csi").await;
        settings.set(CSI_PROXY_AGENT_VERSION, "v1.1.3");
        settings.set(WINS_AGENT_VERSION, "v0.4.0");
        let installer = Installer::new(Arc::new(settings));

        let script = installer.windows_script(&params("https://capr.example.com")).await.unwrap();
        assert!(script.contains("$env:CSI_PROXY_VERSION = \"v1.1.3\""));
        assert!(script.contains("$env:CSI_PROXY_URL = \"https://capr.example.com/assets/csi-proxy-%[1]s.tar.gz\""));
        assert!(script.contains("$env:CATTLE_AGENT_BINARY_BASE_URL=\"https://capr.example.com/assets\""));
    }

    #[tokio::test]
    async fn test_script_fetched_when_setting_overridden() {
        let app = axum::Router::new().route("/install.sh", axum::routing::get(|| async { "echo remote" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let settings = settings_with_local_scripts("remote").await;
        settings.set(SYSTEM_AGENT_INSTALL_SCRIPT, format!("http://{addr}/install.sh"));
        let installer = Installer::new(Arc::new(settings));

        let script = installer.linux_script(&params("")).await.unwrap();
        assert!(script.ends_with("\n\necho remote\n"));
    }

    #[tokio::test]
    async fn test_empty_source_errors() {
        let settings = Settings::with_env(|_| None);
        settings.set(UI_PATH, "/nonexistent/capr");
        let installer = Installer::new(Arc::new(settings));

        let err = installer.windows_script(&params("")).await.unwrap_err();
        assert!(matches!(err, InstallerError::NoSource(_)));
    }
}
