//! TunnelGate Network Layer
//!
//! HTTPS plumbing for the orchestrator:
//! 1. `HttpClient`: hyper + rustls, one connection per request
//! 2. `BackendService`: tokens, credentials, destinations, quota
//! 3. `OAuthProvider`: delegated login with optional second factor

mod backend;
mod client;
mod oauth;

pub use backend::{
    AuthMethod, BackendError, BackendService, Destination, DeviceType, HttpBackend, LoginRequest,
    RemainingTraffic, VpnCredentials, GENERIC_FAILURE,
};
pub use client::{HttpClient, HttpClientConfig, HttpError, Response};
pub use oauth::{GitHubOAuth, OAuthError, OAuthProvider, OAuthProviderConfig, TokenGrant};
