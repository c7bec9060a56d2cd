//! TunnelGate Install - Dependency Installation Verifier
//!
//! Makes sure the privileged pieces a tunnel needs (the kernel driver and
//! the background service) are installed and match the binaries shipped
//! with the running build.
//!
//! # Flow
//!
//! ```text
//!   probe registry ──▶ absent? ─────────────────────▶ Absent
//!        │
//!        ▼
//!   installed path == shipped path? ────────────────▶ Current
//!        │ no
//!        ▼
//!   digest(installed) == digest(shipped)? ── yes ───▶ Current
//!        │ no / unreadable
//!        ▼
//!   installer -uninstall <name> ────────────────────▶ Stale
//! ```
//!
//! A stale artifact is always removed before `Stale` is reported, so the
//! caller's next step is a clean install.

mod artifact;
mod hash;
mod installer;
mod registry;
mod verifier;

pub use artifact::{ArtifactDescriptor, ArtifactKind, ArtifactState, Verification};
pub use hash::HashVerifier;
pub use installer::{
    InstallError, InstallVerb, Installer, PrivilegedInstaller, LAUNCH_FAILED_EXIT_CODE,
};
pub use registry::{ArtifactRegistry, Probe, SystemRegistry};
pub use verifier::DependencyVerifier;
