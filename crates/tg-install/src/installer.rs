//! Privileged Installer
//!
//! Runs the elevated helper that installs or removes an artifact:
//!
//! ```text
//! [elevation] <installer-executable> -<verb> <artifact-name>
//! ```
//!
//! Exit code 0 means success. Launch failures never escape as errors;
//! they are reported as [`LAUNCH_FAILED_EXIT_CODE`].

use crate::artifact::ArtifactDescriptor;
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, error, info};

/// Exit code reported when the helper could not be started at all
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -1;

/// Installer verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallVerb {
    Install,
    Uninstall,
}

impl InstallVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallVerb::Install => "install",
            InstallVerb::Uninstall => "uninstall",
        }
    }

    /// Command-line flag form, e.g. `-install`
    pub fn flag(&self) -> String {
        format!("-{}", self.as_str())
    }
}

impl fmt::Display for InstallVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can run the install helper.
///
/// `run` blocks until the helper exits.
pub trait Installer: Send + Sync {
    fn run(&self, verb: InstallVerb, artifact: &ArtifactDescriptor) -> i32;
}

/// Launches the installer executable, optionally through an elevation
/// command such as `pkexec`.
#[derive(Debug, Clone)]
pub struct PrivilegedInstaller {
    /// Helper executable
    executable: PathBuf,
    /// Elevation wrapper, `None` when already privileged
    elevation: Option<String>,
}

impl PrivilegedInstaller {
    pub fn new(executable: impl Into<PathBuf>, elevation: Option<String>) -> Self {
        Self {
            executable: executable.into(),
            elevation,
        }
    }

    fn command(&self, verb: InstallVerb, artifact: &ArtifactDescriptor) -> Command {
        let mut cmd = match self.elevation.as_deref() {
            Some(wrapper) if !wrapper.trim().is_empty() => {
                let mut cmd = Command::new(wrapper);
                cmd.arg(&self.executable);
                cmd
            }
            _ => Command::new(&self.executable),
        };

        cmd.arg(verb.flag())
            .arg(&artifact.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl Installer for PrivilegedInstaller {
    fn run(&self, verb: InstallVerb, artifact: &ArtifactDescriptor) -> i32 {
        info!("Running installer: {} {}", verb, artifact);

        let output = match self.command(verb, artifact).output() {
            Ok(output) => output,
            Err(e) => {
                error!(
                    "Could not launch installer {} for {}: {}",
                    self.executable.display(),
                    artifact,
                    e
                );
                return LAUNCH_FAILED_EXIT_CODE;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!("installer stdout: {}", stdout.trim());
        }
        if !stderr.trim().is_empty() {
            debug!("installer stderr: {}", stderr.trim());
        }

        // Killed by a signal: no exit code
        let code = output.status.code().unwrap_or(LAUNCH_FAILED_EXIT_CODE);
        info!("Installer {} {} exited with code {}", verb, artifact, code);
        code
    }
}

/// Install errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstallError {
    #[error("Installer exited with code {code} while trying to {verb} {artifact}")]
    NonZeroExit {
        artifact: String,
        verb: InstallVerb,
        code: i32,
    },

    #[error("Could not launch installer to {verb} {artifact}")]
    LaunchFailed { artifact: String, verb: InstallVerb },

    #[error("Installer worker failed: {0}")]
    Worker(String),

    #[error("{artifact} is still not current after install ({reason})")]
    NotCurrent {
        artifact: String,
        reason: &'static str,
    },
}

impl InstallError {
    /// Map a helper exit code to a result
    pub fn check_exit(
        code: i32,
        verb: InstallVerb,
        artifact: &ArtifactDescriptor,
    ) -> Result<(), InstallError> {
        match code {
            0 => Ok(()),
            LAUNCH_FAILED_EXIT_CODE => Err(InstallError::LaunchFailed {
                artifact: artifact.to_string(),
                verb,
            }),
            code => Err(InstallError::NonZeroExit {
                artifact: artifact.to_string(),
                verb,
                code,
            }),
        }
    }
}
