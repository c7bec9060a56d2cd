//! Auth Session Manager
//!
//! Owns the login lifecycle and the current access token.
//!
//! ```text
//!   login ─▶ logout previous ─▶ [delegated] provider token ─▶ backend login ─▶ Session
//!                                     │
//!                                     ▼ 401 + OTP header
//!                              prompt one-time code ─▶ resubmit once
//! ```
//!
//! Login and logout run one at a time. Logout clears the local session
//! before calling the backend, so it never fails from the caller's view.

use crate::device::DeviceIdentity;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tg_network::{
    AuthMethod, BackendError, BackendService, LoginRequest, OAuthError, OAuthProvider, TokenGrant,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Authenticated identity
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub device_id: String,
    pub auth_method: AuthMethod,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[redacted]")
            .field("device_id", &self.device_id)
            .field("auth_method", &self.auth_method)
            .finish()
    }
}

/// User name and password for delegated login
#[derive(Clone)]
pub struct LoginCredentials {
    pub login: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("login", &self.login)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Out-of-band source of one-time codes
#[async_trait]
pub trait SecondFactorPrompt: Send + Sync {
    /// `None` when the user cancels
    async fn one_time_code(&self) -> Option<String>;
}

/// Prompt that always cancels
pub struct NoPrompt;

#[async_trait]
impl SecondFactorPrompt for NoPrompt {
    async fn one_time_code(&self) -> Option<String> {
        None
    }
}

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid login or password")]
    InvalidCredentials,

    #[error("A one-time code is required")]
    SecondFactorRequired,

    #[error("The one-time code was rejected")]
    SecondFactorRejected,

    #[error("Network error: {0}")]
    Network(String),

    #[error("{0}")]
    BackendRejected(String),

    #[error("Login provider unavailable: {0}")]
    DelegationUnavailable(String),
}

impl From<BackendError> for AuthError {
    fn from(e: BackendError) -> Self {
        if e.is_network() {
            AuthError::Network(e.to_string())
        } else {
            AuthError::BackendRejected(e.message())
        }
    }
}

impl From<OAuthError> for AuthError {
    fn from(e: OAuthError) -> Self {
        match e {
            OAuthError::Network(reason) => AuthError::Network(reason),
            OAuthError::Malformed(reason) => AuthError::DelegationUnavailable(reason),
        }
    }
}

/// Read-only view of the current session
#[derive(Clone, Default)]
pub struct SessionHandle {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current access token, if logged in
    pub async fn token(&self) -> Option<String> {
        self.inner.read().await.as_ref().map(|s| s.access_token.clone())
    }

    pub async fn snapshot(&self) -> Option<Session> {
        self.inner.read().await.clone()
    }

    pub async fn is_active(&self) -> bool {
        self.inner.read().await.is_some()
    }

    async fn set(&self, session: Session) {
        *self.inner.write().await = Some(session);
    }

    async fn take(&self) -> Option<Session> {
        self.inner.write().await.take()
    }
}

/// Authentication lifecycle owner
pub struct AuthSessionManager {
    backend: Arc<dyn BackendService>,
    oauth: Arc<dyn OAuthProvider>,
    device: DeviceIdentity,
    session: SessionHandle,
    /// Serializes login and logout
    op: Mutex<()>,
}

impl AuthSessionManager {
    pub fn new(
        backend: Arc<dyn BackendService>,
        oauth: Arc<dyn OAuthProvider>,
        device: DeviceIdentity,
    ) -> Self {
        Self {
            backend,
            oauth,
            device,
            session: SessionHandle::new(),
            op: Mutex::new(()),
        }
    }

    /// Handle for readers (poller, orchestrator)
    pub fn handle(&self) -> SessionHandle {
        self.session.clone()
    }

    pub fn device(&self) -> &DeviceIdentity {
        &self.device
    }

    /// Log in, replacing any existing session.
    ///
    /// `credentials` are required for delegated logins; `prompt` is asked
    /// for a one-time code at most once.
    pub async fn login(
        &self,
        method: AuthMethod,
        credentials: Option<&LoginCredentials>,
        prompt: &dyn SecondFactorPrompt,
    ) -> Result<Session, AuthError> {
        let _op = self.op.lock().await;

        self.logout_locked().await;

        info!("Logging in ({})", method);

        let proof = match method {
            AuthMethod::Anonymous => None,
            AuthMethod::DelegatedOAuth => {
                let credentials = credentials.ok_or(AuthError::InvalidCredentials)?;
                Some(self.delegate(credentials, prompt).await?)
            }
        };

        let request = LoginRequest {
            method,
            device_id: &self.device.id,
            device_name: &self.device.name,
            device_type: self.device.device_type,
            proof: proof.as_deref(),
        };

        let access_token = self.backend.login(request).await.map_err(|e| {
            warn!("Backend login failed: {}", e);
            AuthError::from(e)
        })?;

        let session = Session {
            access_token,
            device_id: self.device.id.clone(),
            auth_method: method,
        };
        self.session.set(session.clone()).await;

        info!("Logged in ({})", method);
        Ok(session)
    }

    /// Best-effort logout; the local session is always cleared
    pub async fn logout(&self) {
        let _op = self.op.lock().await;
        self.logout_locked().await;
    }

    async fn logout_locked(&self) {
        let Some(previous) = self.session.take().await else {
            debug!("No session to log out");
            return;
        };

        match self.backend.logout(&previous.access_token).await {
            Ok(()) => info!("Logged out"),
            Err(e) => warn!("Backend logout failed (session cleared anyway): {}", e),
        }
    }

    /// Obtain a provider token, with at most one second-factor resubmission
    async fn delegate(
        &self,
        credentials: &LoginCredentials,
        prompt: &dyn SecondFactorPrompt,
    ) -> Result<String, AuthError> {
        let first = self
            .oauth
            .request_token(&credentials.login, &credentials.password, None)
            .await?;

        match first {
            TokenGrant::Granted(token) => Ok(token),
            TokenGrant::Denied(status) => {
                warn!("Provider denied login ({})", status);
                Err(AuthError::InvalidCredentials)
            }
            TokenGrant::SecondFactorRequired => {
                let code = prompt
                    .one_time_code()
                    .await
                    .map(|code| code.trim().to_string())
                    .filter(|code| !code.is_empty())
                    .ok_or(AuthError::SecondFactorRequired)?;

                let second = self
                    .oauth
                    .request_token(&credentials.login, &credentials.password, Some(&code))
                    .await?;

                match second {
                    TokenGrant::Granted(token) => Ok(token),
                    _ => {
                        warn!("One-time code rejected");
                        Err(AuthError::SecondFactorRejected)
                    }
                }
            }
        }
    }
}
