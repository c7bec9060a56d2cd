//! Device identity reported to the backend at login.

use crate::config::OrchestratorConfig;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::Path;
use tg_network::DeviceType;
use tracing::{debug, warn};

const MACHINE_ID_PATH: &str = "/etc/machine-id";
const HOSTNAME_PATH: &str = "/etc/hostname";
const FALLBACK_NAME: &str = "tunnelgate";

/// Stable identity of this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    pub device_type: DeviceType,
}

impl DeviceIdentity {
    /// Resolve from configuration, then the system, then a random id
    pub fn resolve(config: &OrchestratorConfig) -> Self {
        Self::resolve_from(config, Path::new(MACHINE_ID_PATH), Path::new(HOSTNAME_PATH))
    }

    fn resolve_from(config: &OrchestratorConfig, machine_id: &Path, hostname: &Path) -> Self {
        let id = config
            .device_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| read_trimmed(machine_id))
            .unwrap_or_else(|| {
                warn!("No machine id available, using a random device id");
                random_id()
            });

        let name = config
            .device_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| read_trimmed(hostname))
            .unwrap_or_else(|| FALLBACK_NAME.to_string());

        debug!("Device identity resolved (name: {})", name);

        Self {
            id,
            name,
            device_type: config.device_type,
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let trimmed = content.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_id_wins() {
        let mut config = OrchestratorConfig::default();
        config.device_id = Some("abc".into());
        config.device_name = Some("desk".into());

        let device = DeviceIdentity::resolve_from(
            &config,
            Path::new("/nonexistent/machine-id"),
            Path::new("/nonexistent/hostname"),
        );
        assert_eq!(device.id, "abc");
        assert_eq!(device.name, "desk");
    }

    #[test]
    fn test_machine_id_file() {
        let path = std::env::temp_dir().join(format!("tg-machine-id-{}", std::process::id()));
        std::fs::write(&path, "0123456789abcdef\n").unwrap();

        let device = DeviceIdentity::resolve_from(
            &OrchestratorConfig::default(),
            &path,
            Path::new("/nonexistent/hostname"),
        );
        assert_eq!(device.id, "0123456789abcdef");
        assert_eq!(device.name, FALLBACK_NAME);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_random_fallback() {
        let device = DeviceIdentity::resolve_from(
            &OrchestratorConfig::default(),
            Path::new("/nonexistent/machine-id"),
            Path::new("/nonexistent/hostname"),
        );
        assert_eq!(device.id.len(), 32);
        assert!(device.id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
