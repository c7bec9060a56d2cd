//! TunnelGate VPN - Session and Connectivity Orchestrator
//!
//! Authenticates the device, negotiates per-destination credentials,
//! drives the tunnel client and keeps the quota fresh. Nothing connects
//! until the driver and service pass the startup gate.
//!
//! # Architecture
//!
//! ```text
//!  DependencyVerifier ──────────── gate ─────────────┐
//!                                                    ▼
//!  AuthSessionManager ── token ──▶ CredentialBroker ──▶ ConnectionController ◀── events ── TunnelClient
//!         │                                                  │
//!         └──── token ──▶ TrafficPoller ── quota ──▶ TrafficBoard ◀── stats
//!                                                            │
//!                                        state() / traffic() ▼
//!                                                            UI
//! ```

mod config;
mod controller;
mod credentials;
mod device;
mod orchestrator;
mod poller;
mod session;
mod traffic;
mod tunnel;

pub use config::{
    ConfigError, HttpSettings, InstallSettings, OrchestratorConfig, TransportMode, TunnelSettings,
};
pub use controller::{ConnectError, ConnectionController, ConnectionState, DependencyGate};
pub use credentials::{CredentialBroker, Credentials, CredentialsError};
pub use device::DeviceIdentity;
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorError};
pub use poller::TrafficPoller;
pub use session::{
    AuthError, AuthSessionManager, LoginCredentials, NoPrompt, SecondFactorPrompt, Session,
    SessionHandle,
};
pub use traffic::{Quota, TrafficBoard, TrafficSnapshot};
pub use tunnel::{
    TaggedEvent, TunnelClient, TunnelError, TunnelEvent, TunnelEventSender, TunnelFactory, TunnelStats,
};
