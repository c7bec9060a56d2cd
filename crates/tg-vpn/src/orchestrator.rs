//! Orchestrator
//!
//! Single owner of configuration, device identity and every component.
//! The UI calls into it and watches `state()` and `traffic()`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let collaborators = Collaborators::from_config(&config, tunnels)?;
//! let orchestrator = Orchestrator::new(config, collaborators)?;
//!
//! orchestrator.ensure_dependencies().await?;
//! orchestrator.login(None, &NoPrompt).await?;
//! orchestrator.select_destination("de").await;
//! orchestrator.connect().await?;
//! ```

use crate::config::{ConfigError, OrchestratorConfig};
use crate::controller::{ConnectError, ConnectionController, ConnectionState, DependencyGate};
use crate::credentials::{CredentialBroker, Credentials, CredentialsError};
use crate::device::DeviceIdentity;
use crate::poller::TrafficPoller;
use crate::session::{AuthError, AuthSessionManager, LoginCredentials, SecondFactorPrompt, Session, SessionHandle};
use crate::traffic::{TrafficBoard, TrafficSnapshot};
use crate::tunnel::TunnelFactory;
use std::sync::Arc;
use tg_install::{
    ArtifactRegistry, DependencyVerifier, InstallError, Installer, PrivilegedInstaller, SystemRegistry,
    Verification,
};
use tg_network::{BackendService, Destination, GitHubOAuth, HttpBackend, HttpClient, OAuthProvider};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// External capabilities the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn BackendService>,
    pub oauth: Arc<dyn OAuthProvider>,
    pub tunnels: Arc<dyn TunnelFactory>,
    pub registry: Arc<dyn ArtifactRegistry>,
    pub installer: Arc<dyn Installer>,
}

impl Collaborators {
    /// Production collaborators built from configuration
    pub fn from_config(
        config: &OrchestratorConfig,
        tunnels: Arc<dyn TunnelFactory>,
    ) -> Result<Self, ConfigError> {
        let client = HttpClient::new(config.http.client_config());
        let backend = HttpBackend::new(client.clone(), config.backend_url()?, config.carrier_id.clone());
        let oauth = GitHubOAuth::new(client, config.oauth.clone());

        let install = &config.install;
        let bundle_dir = install.bundle_dir()?;
        let registry = SystemRegistry::new(&install.system_dir, &install.unit_dir);
        let installer =
            PrivilegedInstaller::new(install.installer_path(&bundle_dir), install.elevation.clone());

        Ok(Self {
            backend: Arc::new(backend),
            oauth: Arc::new(oauth),
            tunnels,
            registry: Arc::new(registry),
            installer: Arc::new(installer),
        })
    }
}

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("{0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Credentials(#[from] CredentialsError),

    #[error("{0}")]
    Connect(#[from] ConnectError),

    #[error("Not logged in")]
    NotLoggedIn,
}

/// Destination the user picked and the credentials last fetched
#[derive(Debug, Default)]
struct Selection {
    destination: Option<String>,
    credentials: Option<Credentials>,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    verifier: DependencyVerifier,
    auth: AuthSessionManager,
    session: SessionHandle,
    broker: CredentialBroker,
    controller: ConnectionController,
    traffic: TrafficBoard,
    poller: Arc<TrafficPoller>,
    poll_task: JoinHandle<()>,
    selection: Mutex<Selection>,
}

impl Orchestrator {
    /// Build every component and start the traffic poller.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let device = DeviceIdentity::resolve(&config);
        let bundle_dir = config.install.bundle_dir()?;

        let verifier = DependencyVerifier::new(
            bundle_dir,
            collaborators.registry,
            collaborators.installer,
        );
        let auth = AuthSessionManager::new(
            collaborators.backend.clone(),
            collaborators.oauth,
            device,
        );
        let session = auth.handle();
        let broker = CredentialBroker::new(collaborators.backend.clone());

        let traffic = TrafficBoard::new();
        let controller = ConnectionController::new(
            collaborators.tunnels,
            config.transport,
            DependencyGate::new(),
            traffic.clone(),
        );

        let poller = Arc::new(TrafficPoller::new(
            session.clone(),
            collaborators.backend,
            traffic.clone(),
            config.poll_interval(),
        ));
        let poll_task = poller.clone().spawn();

        info!(
            "Orchestrator ready ({} login, {:?} transport)",
            config.auth, config.transport
        );

        Ok(Self {
            config,
            verifier,
            auth,
            session,
            broker,
            controller,
            traffic,
            poller,
            poll_task,
            selection: Mutex::new(Selection::default()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceIdentity {
        self.auth.device()
    }

    /// Startup gate: driver, then service.
    ///
    /// Opens the connection gate only when both are current or were
    /// installed successfully. The first install failure aborts.
    pub async fn ensure_dependencies(&self) -> Result<Vec<Verification>, OrchestratorError> {
        let gate = self.controller.gate();
        gate.close();

        let mut verdicts = Vec::with_capacity(2);
        for artifact in self.config.install.artifacts() {
            match self.verifier.ensure_current(artifact).await {
                Ok(verdict) => verdicts.push(verdict),
                Err(e) => {
                    warn!("Startup gate failed on {}: {}", artifact, e);
                    return Err(e.into());
                }
            }
        }

        gate.open();
        info!("Dependencies verified");
        Ok(verdicts)
    }

    /// Log in with the configured method.
    ///
    /// An active tunnel is disconnected first; the previous session is
    /// always logged out.
    pub async fn login(
        &self,
        credentials: Option<&LoginCredentials>,
        prompt: &dyn SecondFactorPrompt,
    ) -> Result<Session, OrchestratorError> {
        self.controller.disconnect().await;
        self.clear_session_state().await;

        let session = self.auth.login(self.config.auth, credentials, prompt).await?;

        self.poller.tick().await;
        Ok(session)
    }

    /// Disconnect, then log out. Never fails.
    pub async fn logout(&self) {
        self.controller.disconnect().await;
        self.auth.logout().await;
        self.clear_session_state().await;
        info!("Session ended");
    }

    /// Destinations available to the current session
    pub async fn destinations(&self) -> Result<Vec<Destination>, OrchestratorError> {
        let token = self.require_token().await?;
        Ok(self.broker.list_destinations(&token).await?)
    }

    /// Pick the destination for the next connect
    pub async fn select_destination(&self, code: &str) {
        let code = code.trim().to_string();
        info!("Destination selected: '{}'", code);
        self.selection.lock().await.destination = Some(code);
    }

    pub async fn selected_destination(&self) -> Option<String> {
        self.selection.lock().await.destination.clone()
    }

    /// Connect to the selected destination.
    ///
    /// Credentials are re-fetched unless the held ones were issued for the
    /// selected destination.
    pub async fn connect(&self) -> Result<(), OrchestratorError> {
        self.controller.preflight()?;
        let token = self.require_token().await?;

        let (destination, credentials) = {
            let mut selection = self.selection.lock().await;
            let destination = selection
                .destination
                .clone()
                .ok_or(CredentialsError::NoDestination)?;

            let reusable = selection
                .credentials
                .as_ref()
                .filter(|held| held.is_issued_for(&destination))
                .cloned();

            let credentials = match reusable {
                Some(held) => held,
                None => {
                    let fresh = self.broker.get_credentials(&token, &destination).await?;
                    selection.credentials = Some(fresh.clone());
                    fresh
                }
            };
            (destination, credentials)
        };

        self.controller.connect(&credentials, &destination).await?;
        self.poller.tick().await;
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.controller.disconnect().await;
    }

    /// Watch connection state
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.controller.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Watch traffic counters and quota
    pub fn traffic(&self) -> watch::Receiver<TrafficSnapshot> {
        self.traffic.subscribe()
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.snapshot().await
    }

    async fn require_token(&self) -> Result<String, OrchestratorError> {
        self.session.token().await.ok_or(OrchestratorError::NotLoggedIn)
    }

    async fn clear_session_state(&self) {
        *self.selection.lock().await = Selection::default();
        self.traffic.reset();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.poll_task.abort();
    }
}
