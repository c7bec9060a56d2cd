//! Orchestrator Configuration
//!
//! Loaded from a TOML or JSON file. Every field has a default, so a partial
//! file (or no file at all) still yields a usable configuration.
//!
//! ```toml
//! backend_url = "https://backend.northghost.com"
//! carrier_id = "touchvpn"
//! auth = "anonymous"
//! transport = "service"
//!
//! [install]
//! elevation = "pkexec"
//! unit_dir = "/etc/systemd/system"
//!
//! [oauth]
//! client_id = "..."
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tg_install::ArtifactDescriptor;
use tg_network::{AuthMethod, DeviceType, HttpClientConfig, OAuthProviderConfig};
use tracing::info;
use url::Url;

/// Where the tunnel runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Inside the privileged background service
    #[default]
    Service,
    /// In-process, talking to the driver directly
    Direct,
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Backend base URL
    pub backend_url: String,
    /// Carrier id sent with every backend call
    pub carrier_id: String,
    /// Fixed device id (machine id when unset)
    pub device_id: Option<String>,
    /// Device name reported at login (host name when unset)
    pub device_name: Option<String>,
    pub device_type: DeviceType,
    pub transport: TransportMode,
    pub auth: AuthMethod,
    /// Quota refresh period (seconds)
    pub poll_interval_secs: u64,
    pub install: InstallSettings,
    pub oauth: OAuthProviderConfig,
    pub http: HttpSettings,
    pub tunnel: TunnelSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_url: "https://backend.northghost.com".to_string(),
            carrier_id: "touchvpn".to_string(),
            device_id: None,
            device_name: None,
            device_type: DeviceType::default(),
            transport: TransportMode::default(),
            auth: AuthMethod::Anonymous,
            poll_interval_secs: 10,
            install: InstallSettings::default(),
            oauth: OAuthProviderConfig::default(),
            http: HttpSettings::default(),
            tunnel: TunnelSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a file, picking the format by extension
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = match ext {
            "toml" => Self::from_toml_file(path)?,
            "json" => Self::from_json_file(path)?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parsed backend URL
    pub fn backend_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.backend_url)
            .map_err(|e| ConfigError::InvalidBackendUrl(format!("{}: {}", self.backend_url, e)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBackendUrl(self.backend_url.clone()));
        }
        if self.carrier_id.trim().is_empty() {
            return Err(ConfigError::MissingCarrierId);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if self.auth == AuthMethod::DelegatedOAuth && self.oauth.client_id.is_empty() {
            return Err(ConfigError::MissingOAuthClient);
        }
        if self.install.driver.name.is_empty() || self.install.service.name.is_empty() {
            return Err(ConfigError::InvalidArtifact);
        }
        Ok(())
    }
}

/// Driver and service installation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSettings {
    /// Directory holding the binaries shipped with this build
    /// (directory of the running executable when unset)
    pub bundle_dir: Option<PathBuf>,
    /// Installer helper, relative to the bundle directory unless absolute
    pub installer: PathBuf,
    /// Elevation command prefix; `None` when already privileged
    pub elevation: Option<String>,
    /// Where the installed driver lives
    pub system_dir: PathBuf,
    /// Where service unit files live
    pub unit_dir: PathBuf,
    pub driver: ArtifactDescriptor,
    pub service: ArtifactDescriptor,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            bundle_dir: None,
            installer: PathBuf::from("tg-installer"),
            elevation: Some("pkexec".to_string()),
            system_dir: PathBuf::from("/usr/lib/tunnelgate"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            driver: ArtifactDescriptor::driver("tgtun", "tgtun.ko"),
            service: ArtifactDescriptor::service("tgsvc", "tgsvc"),
        }
    }
}

impl InstallSettings {
    /// Resolve the bundle directory
    pub fn bundle_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.bundle_dir {
            return Ok(dir.clone());
        }

        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .ok_or(ConfigError::MissingInstallPath)
    }

    /// Resolve the installer helper path
    pub fn installer_path(&self, bundle_dir: &Path) -> PathBuf {
        if self.installer.is_absolute() {
            self.installer.clone()
        } else {
            bundle_dir.join(&self.installer)
        }
    }

    /// Artifacts in installation order
    pub fn artifacts(&self) -> [&ArtifactDescriptor; 2] {
        [&self.driver, &self.service]
    }
}

/// HTTP timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let defaults = HttpClientConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            user_agent: defaults.user_agent,
        }
    }
}

impl HttpSettings {
    pub fn client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Process-backed tunnel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelSettings {
    /// Tunnel executable
    pub executable: PathBuf,
    /// Extra arguments placed before the destination address
    pub args: Vec<String>,
    /// Domains routed around the tunnel; `*.` prefixes match subdomains
    pub bypass_domains: Vec<String>,
}

impl TunnelSettings {
    /// Bypass domains with blank entries dropped
    pub fn bypass(&self) -> impl Iterator<Item = &str> {
        self.bypass_domains
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("tg-tunnel"),
            args: Vec::new(),
            bypass_domains: vec!["iplocation.net".to_string(), "*.iplocation.net".to_string()],
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Install path could not be determined")]
    MissingInstallPath,

    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(String),

    #[error("Carrier id is empty")]
    MissingCarrierId,

    #[error("Poll interval must be at least one second")]
    InvalidPollInterval,

    #[error("Delegated login needs an OAuth client id")]
    MissingOAuthClient,

    #[error("Artifact names must not be empty")]
    InvalidArtifact,
}
