//! Artifact registry probes.
//!
//! The driver is looked up by file under the system driver directory.
//! The service is looked up through its systemd unit: the first token of
//! `ExecStart=` is the installed binary.

use crate::artifact::{ArtifactDescriptor, ArtifactKind};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of asking the platform about an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Nothing registered under that name
    NotRegistered,
    /// Registered; path is `None` when it could not be determined
    Registered { path: Option<PathBuf> },
}

/// Source of truth for what is installed on this machine.
pub trait ArtifactRegistry: Send + Sync {
    fn probe(&self, artifact: &ArtifactDescriptor) -> Probe;
}

/// Filesystem-backed registry
#[derive(Debug, Clone)]
pub struct SystemRegistry {
    /// Directory holding installed driver binaries
    system_dir: PathBuf,
    /// Directory holding service unit files
    unit_dir: PathBuf,
}

impl SystemRegistry {
    pub fn new(system_dir: impl Into<PathBuf>, unit_dir: impl Into<PathBuf>) -> Self {
        Self {
            system_dir: system_dir.into(),
            unit_dir: unit_dir.into(),
        }
    }

    fn probe_driver(&self, artifact: &ArtifactDescriptor) -> Probe {
        let path = self.system_dir.join(&artifact.file_name);
        if path.is_file() {
            Probe::Registered { path: Some(path) }
        } else {
            Probe::NotRegistered
        }
    }

    fn probe_service(&self, artifact: &ArtifactDescriptor) -> Probe {
        let unit = self.unit_dir.join(format!("{}.service", artifact.name));
        if !unit.exists() {
            return Probe::NotRegistered;
        }

        let path = match std::fs::read_to_string(&unit) {
            Ok(content) => exec_start_path(&content),
            Err(e) => {
                debug!("Could not read unit {}: {}", unit.display(), e);
                None
            }
        };
        Probe::Registered { path }
    }
}

impl ArtifactRegistry for SystemRegistry {
    fn probe(&self, artifact: &ArtifactDescriptor) -> Probe {
        match artifact.kind {
            ArtifactKind::Driver => self.probe_driver(artifact),
            ArtifactKind::Service => self.probe_service(artifact),
        }
    }
}

/// Extract the binary path from a unit file's `ExecStart=` line.
fn exec_start_path(unit: &str) -> Option<PathBuf> {
    let value = unit
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("ExecStart="))?;

    // systemd prefixes: '-', '@', ':', '+', '!'
    let value = value.trim_start_matches(['-', '@', ':', '+', '!']).trim();

    let token = if let Some(quoted) = value.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        value.split_whitespace().next()?
    };

    if token.is_empty() {
        None
    } else {
        Some(Path::new(token).to_path_buf())
    }
}
