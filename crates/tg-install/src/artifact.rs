//! Artifact descriptors and verification results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of installable system component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Kernel-level network driver
    Driver,
    /// Privileged background service
    Service,
}

impl ArtifactKind {
    /// Human-readable label used in logs and prompts
    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Driver => "tunnel driver",
            ArtifactKind::Service => "tunnel service",
        }
    }
}

/// Describes one artifact the tunnel depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Driver or service
    pub kind: ArtifactKind,
    /// Name passed to the installer and used for registry lookups
    pub name: String,
    /// Binary file name, both in the bundle and on the system
    pub file_name: String,
}

impl ArtifactDescriptor {
    pub fn driver(name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Driver,
            name: name.into(),
            file_name: file_name.into(),
        }
    }

    pub fn service(name: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            kind: ArtifactKind::Service,
            name: name.into(),
            file_name: file_name.into(),
        }
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind.label(), self.name)
    }
}

/// What a single verification pass observed on disk.
///
/// Recomputed on every pass, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactState {
    /// Registered with the system at all
    pub present: bool,
    /// Binary path reported by the registry
    pub path_on_disk: Option<PathBuf>,
    /// Digest of that binary, if it could be read
    pub content_digest: Option<String>,
}

/// Verification verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Installed and matches the shipped binary
    Current,
    /// Was installed but outdated; already uninstalled
    Stale,
    /// Not installed
    Absent,
}

impl Verification {
    /// Whether an install is needed before the tunnel may start
    pub fn needs_install(&self) -> bool {
        !matches!(self, Verification::Current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_install() {
        assert!(!Verification::Current.needs_install());
        assert!(Verification::Stale.needs_install());
        assert!(Verification::Absent.needs_install());
    }

    #[test]
    fn test_descriptor_display() {
        let driver = ArtifactDescriptor::driver("tgtun", "tgtun.ko");
        assert_eq!(driver.to_string(), "tunnel driver 'tgtun'");
    }
}
