//! Dependency Installation Verifier
//!
//! Decides whether each artifact is current, stale or absent, and removes
//! stale artifacts so the caller always performs a clean install.
//!
//! Hashing and installer runs block, so every pass is moved onto tokio's
//! blocking pool and never stalls the async side.

use crate::artifact::{ArtifactDescriptor, ArtifactState, Verification};
use crate::hash::HashVerifier;
use crate::installer::{InstallError, InstallVerb, Installer};
use crate::registry::{ArtifactRegistry, Probe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Verifies and installs the artifacts shipped in `bundle_dir`.
#[derive(Clone)]
pub struct DependencyVerifier {
    /// Directory with the binaries shipped alongside this build
    bundle_dir: PathBuf,
    registry: Arc<dyn ArtifactRegistry>,
    installer: Arc<dyn Installer>,
    hasher: HashVerifier,
}

/// Outcome of inspecting an artifact, before any side effect
#[derive(Debug, Clone, PartialEq, Eq)]
enum Assessment {
    Absent,
    Current,
    Stale(&'static str),
}

impl DependencyVerifier {
    pub fn new(
        bundle_dir: impl Into<PathBuf>,
        registry: Arc<dyn ArtifactRegistry>,
        installer: Arc<dyn Installer>,
    ) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            registry,
            installer,
            hasher: HashVerifier::new(),
        }
    }

    /// Path of the shipped binary for an artifact
    pub fn shipped_path(&self, artifact: &ArtifactDescriptor) -> PathBuf {
        self.bundle_dir.join(&artifact.file_name)
    }

    /// Observe the installed artifact without touching it
    pub async fn inspect(&self, artifact: &ArtifactDescriptor) -> ArtifactState {
        let this = self.clone();
        let artifact = artifact.clone();

        tokio::task::spawn_blocking(move || this.observe(&artifact))
            .await
            .unwrap_or_default()
    }

    /// Verify an artifact.
    ///
    /// A stale artifact is uninstalled before this returns.
    pub async fn verify(&self, artifact: &ArtifactDescriptor) -> Verification {
        let this = self.clone();
        let owned = artifact.clone();

        let result = tokio::task::spawn_blocking(move || this.verify_blocking(&owned)).await;

        match result {
            Ok(verification) => verification,
            Err(e) => {
                // Fail safe: a reinstall is always allowed
                error!("Verification worker for {} failed: {}", artifact, e);
                Verification::Stale
            }
        }
    }

    /// Install an artifact, waiting for the helper to exit.
    ///
    /// Not retried; the caller decides what to do with a failure.
    pub async fn install(&self, artifact: &ArtifactDescriptor) -> Result<(), InstallError> {
        self.run_installer(InstallVerb::Install, artifact).await
    }

    /// Verify, then install when the artifact is not current.
    ///
    /// An install only counts once the artifact verifies current afterwards.
    /// Returns the verdict observed before any install.
    pub async fn ensure_current(
        &self,
        artifact: &ArtifactDescriptor,
    ) -> Result<Verification, InstallError> {
        let verdict = self.verify(artifact).await;

        if verdict.needs_install() {
            info!("Installing {} ({:?})", artifact, verdict);
            self.install(artifact).await?;
            self.confirm_installed(artifact).await?;
            info!("Installed {}", artifact);
        } else {
            debug!("{} is current", artifact);
        }

        Ok(verdict)
    }

    /// Re-assess after an install, without uninstalling on a bad verdict
    async fn confirm_installed(&self, artifact: &ArtifactDescriptor) -> Result<(), InstallError> {
        let this = self.clone();
        let owned = artifact.clone();

        let assessment = tokio::task::spawn_blocking(move || this.assess(&owned))
            .await
            .map_err(|e| InstallError::Worker(e.to_string()))?;

        match assessment {
            Assessment::Current => Ok(()),
            Assessment::Absent => Err(InstallError::NotCurrent {
                artifact: artifact.to_string(),
                reason: "not installed",
            }),
            Assessment::Stale(reason) => Err(InstallError::NotCurrent {
                artifact: artifact.to_string(),
                reason,
            }),
        }
    }

    async fn run_installer(
        &self,
        verb: InstallVerb,
        artifact: &ArtifactDescriptor,
    ) -> Result<(), InstallError> {
        let installer = self.installer.clone();
        let owned = artifact.clone();

        let code = tokio::task::spawn_blocking(move || installer.run(verb, &owned))
            .await
            .map_err(|e| InstallError::Worker(e.to_string()))?;

        InstallError::check_exit(code, verb, artifact)
    }

    fn verify_blocking(&self, artifact: &ArtifactDescriptor) -> Verification {
        match self.assess(artifact) {
            Assessment::Absent => {
                info!("{} is not installed", artifact);
                Verification::Absent
            }
            Assessment::Current => Verification::Current,
            Assessment::Stale(reason) => {
                warn!("{} is stale ({}), removing it", artifact, reason);

                let code = self.installer.run(InstallVerb::Uninstall, artifact);
                if let Err(e) = InstallError::check_exit(code, InstallVerb::Uninstall, artifact) {
                    // Still stale; the following install decides
                    warn!("Uninstall of {} failed: {}", artifact, e);
                }
                Verification::Stale
            }
        }
    }

    fn assess(&self, artifact: &ArtifactDescriptor) -> Assessment {
        let installed = match self.registry.probe(artifact) {
            Probe::NotRegistered => return Assessment::Absent,
            Probe::Registered { path: None } => return Assessment::Stale("unknown binary path"),
            Probe::Registered { path: Some(path) } => path,
        };

        let shipped = self.shipped_path(artifact);
        if same_path(&installed, &shipped) {
            return Assessment::Current;
        }

        let installed_digest = self.hasher.digest_file(&installed);
        let shipped_digest = self.hasher.digest_file(&shipped);

        match (installed_digest, shipped_digest) {
            (Ok(a), Ok(b)) if a == b => Assessment::Current,
            (Ok(_), Ok(_)) => Assessment::Stale("content differs"),
            (Err(e), _) => {
                debug!("Cannot hash installed {}: {}", installed.display(), e);
                Assessment::Stale("installed binary unreadable")
            }
            (_, Err(e)) => {
                debug!("Cannot hash shipped {}: {}", shipped.display(), e);
                Assessment::Stale("shipped binary unreadable")
            }
        }
    }

    fn observe(&self, artifact: &ArtifactDescriptor) -> ArtifactState {
        match self.registry.probe(artifact) {
            Probe::NotRegistered => ArtifactState::default(),
            Probe::Registered { path } => {
                let content_digest = path
                    .as_deref()
                    .and_then(|p| self.hasher.digest_file(p).ok());
                ArtifactState {
                    present: true,
                    path_on_disk: path,
                    content_digest,
                }
            }
        }
    }
}

/// Same location, literally or after resolving links
fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Registry fake: name -> probe result
    #[derive(Default)]
    struct FakeRegistry {
        entries: Mutex<HashMap<String, Probe>>,
    }

    impl FakeRegistry {
        fn set(&self, name: &str, probe: Probe) {
            self.entries.lock().unwrap().insert(name.to_string(), probe);
        }
    }

    impl ArtifactRegistry for FakeRegistry {
        fn probe(&self, artifact: &ArtifactDescriptor) -> Probe {
            self.entries
                .lock()
                .unwrap()
                .get(&artifact.name)
                .cloned()
                .unwrap_or(Probe::NotRegistered)
        }
    }

    /// Installer fake recording calls; `install` registers the shipped path
    struct FakeInstaller {
        calls: Mutex<Vec<(InstallVerb, String)>>,
        exit_code: i32,
        /// Exit successfully without registering anything
        hollow: bool,
        registry: Arc<FakeRegistry>,
        bundle_dir: PathBuf,
    }

    impl FakeInstaller {
        fn calls(&self) -> Vec<(InstallVerb, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Installer for FakeInstaller {
        fn run(&self, verb: InstallVerb, artifact: &ArtifactDescriptor) -> i32 {
            self.calls.lock().unwrap().push((verb, artifact.name.clone()));
            if self.exit_code == 0 && !self.hollow {
                match verb {
                    InstallVerb::Install => self.registry.set(
                        &artifact.name,
                        Probe::Registered {
                            path: Some(self.bundle_dir.join(&artifact.file_name)),
                        },
                    ),
                    InstallVerb::Uninstall => self.registry.set(&artifact.name, Probe::NotRegistered),
                }
            }
            self.exit_code
        }
    }

    struct Fixture {
        dir: PathBuf,
        registry: Arc<FakeRegistry>,
        installer: Arc<FakeInstaller>,
        verifier: DependencyVerifier,
    }

    fn fixture(name: &str, exit_code: i32) -> Fixture {
        fixture_with(name, exit_code, false)
    }

    fn fixture_with(name: &str, exit_code: i32, hollow: bool) -> Fixture {
        let dir = std::env::temp_dir().join(format!("tg-verifier-{}-{}", name, std::process::id()));
        let bundle = dir.join("bundle");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::create_dir_all(dir.join("system")).unwrap();
        std::fs::write(bundle.join("tgsvc"), b"service build 42").unwrap();

        let registry = Arc::new(FakeRegistry::default());
        let installer = Arc::new(FakeInstaller {
            calls: Mutex::new(Vec::new()),
            exit_code,
            hollow,
            registry: registry.clone(),
            bundle_dir: bundle.clone(),
        });
        let verifier = DependencyVerifier::new(&bundle, registry.clone(), installer.clone());

        Fixture { dir, registry, installer, verifier }
    }

    fn service() -> ArtifactDescriptor {
        ArtifactDescriptor::service("tgsvc", "tgsvc")
    }

    #[tokio::test]
    async fn test_absent() {
        let fx = fixture("absent", 0);

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Absent);
        assert!(fx.installer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_same_path_is_current() {
        let fx = fixture("same-path", 0);
        fx.registry.set(
            "tgsvc",
            Probe::Registered { path: Some(fx.verifier.shipped_path(&service())) },
        );

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Current);
        assert!(fx.installer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_same_digest_is_current() {
        let fx = fixture("same-digest", 0);
        let installed = fx.dir.join("system").join("tgsvc");
        std::fs::write(&installed, b"service build 42").unwrap();
        fx.registry.set("tgsvc", Probe::Registered { path: Some(installed) });

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Current);
        assert!(fx.installer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_digest_mismatch_uninstalls() {
        let fx = fixture("mismatch", 0);
        let installed = fx.dir.join("system").join("tgsvc");
        std::fs::write(&installed, b"service build 41").unwrap();
        fx.registry.set("tgsvc", Probe::Registered { path: Some(installed) });

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Stale);
        assert_eq!(
            fx.installer.calls(),
            vec![(InstallVerb::Uninstall, "tgsvc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_unreadable_installed_binary_is_stale() {
        let fx = fixture("unreadable", 0);
        let missing = fx.dir.join("system").join("gone");
        fx.registry.set("tgsvc", Probe::Registered { path: Some(missing) });

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Stale);
        assert_eq!(fx.installer.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_path_is_stale() {
        let fx = fixture("unknown-path", 0);
        fx.registry.set("tgsvc", Probe::Registered { path: None });

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Stale);
        assert_eq!(fx.installer.calls()[0].0, InstallVerb::Uninstall);
    }

    #[tokio::test]
    async fn test_absent_then_install_then_current() {
        let fx = fixture("install-flow", 0);

        assert_eq!(fx.verifier.verify(&service()).await, Verification::Absent);
        fx.verifier.install(&service()).await.unwrap();
        assert_eq!(fx.verifier.verify(&service()).await, Verification::Current);

        assert_eq!(
            fx.installer.calls(),
            vec![(InstallVerb::Install, "tgsvc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_install_failure() {
        let fx = fixture("install-fails", 2);

        let err = fx.verifier.install(&service()).await.unwrap_err();
        assert!(matches!(err, InstallError::NonZeroExit { code: 2, .. }));
    }

    #[tokio::test]
    async fn test_ensure_current_reinstalls_stale() {
        let fx = fixture("ensure", 0);
        let installed = fx.dir.join("system").join("tgsvc");
        std::fs::write(&installed, b"old").unwrap();
        fx.registry.set("tgsvc", Probe::Registered { path: Some(installed) });

        let before = fx.verifier.ensure_current(&service()).await.unwrap();

        assert_eq!(before, Verification::Stale);
        assert_eq!(
            fx.installer.calls(),
            vec![
                (InstallVerb::Uninstall, "tgsvc".to_string()),
                (InstallVerb::Install, "tgsvc".to_string()),
            ]
        );
        assert_eq!(fx.verifier.verify(&service()).await, Verification::Current);
    }

    #[tokio::test]
    async fn test_ensure_current_rejects_install_that_changed_nothing() {
        let fx = fixture_with("hollow-install", 0, true);

        let err = fx.verifier.ensure_current(&service()).await.unwrap_err();

        assert!(matches!(err, InstallError::NotCurrent { reason: "not installed", .. }));
        assert_eq!(
            fx.installer.calls(),
            vec![(InstallVerb::Install, "tgsvc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_inspect() {
        let fx = fixture("inspect", 0);
        assert_eq!(fx.verifier.inspect(&service()).await, ArtifactState::default());

        let shipped = fx.verifier.shipped_path(&service());
        fx.registry.set("tgsvc", Probe::Registered { path: Some(shipped.clone()) });

        let state = fx.verifier.inspect(&service()).await;
        assert!(state.present);
        assert_eq!(state.path_on_disk, Some(shipped));
        assert!(state.content_digest.is_some());
    }
}
