//! Tunnel Client Contract
//!
//! The transport itself is opaque. A client is started with an endpoint
//! address and secret, and reports back through a `TunnelEventSender`
//! tagged with the generation it was created for.

use crate::config::TransportMode;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Transport counters reported by the tunnel client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunnelStats {
    /// Bytes sent through tunnel
    pub bytes_sent: u64,
    /// Bytes received through tunnel
    pub bytes_received: u64,
}

/// Notifications from a tunnel client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEvent {
    Connected,
    /// Tunnel went down (requested or not)
    Disconnected,
    StatisticsChanged(TunnelStats),
}

/// Event with the generation of the client that sent it
pub type TaggedEvent = (u64, TunnelEvent);

/// Event sink handed to one tunnel client instance
#[derive(Debug, Clone)]
pub struct TunnelEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl TunnelEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    /// Report an event; false once the controller is gone
    pub fn send(&self, event: TunnelEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Opaque transport
#[async_trait]
pub trait TunnelClient: Send {
    /// Bring the tunnel up; `Connected` follows as an event
    async fn start(&mut self, address: &str, secret: &str) -> Result<(), TunnelError>;

    /// Tear the tunnel down
    async fn stop(&mut self) -> Result<(), TunnelError>;
}

/// Builds a fresh tunnel client for every connect
pub trait TunnelFactory: Send + Sync {
    fn create(
        &self,
        mode: TransportMode,
        events: TunnelEventSender,
    ) -> Result<Box<dyn TunnelClient>, TunnelError>;
}

/// Tunnel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TunnelError {
    #[error("Tunnel unavailable: {0}")]
    Unavailable(String),

    #[error("Tunnel failed to start: {0}")]
    StartFailed(String),

    #[error("Tunnel failed to stop: {0}")]
    StopFailed(String),
}
