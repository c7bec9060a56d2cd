//! Connection Controller
//!
//! Drives the tunnel client through a four-state machine:
//!
//! ```text
//!              connect()                 Connected event
//! Disconnected ─────────▶ Connecting ───────────────────▶ Connected
//!      ▲                      │                              │
//!      │   start failed       │ disconnect() / Disconnected  │
//!      ├──────────────────────┤            event             │
//!      │                      ▼                              │
//!      └────────────── Disconnecting ◀───────────────────────┘
//! ```
//!
//! A user disconnect and a tunnel that drops on its own publish the same
//! sequence: Disconnecting, then Disconnected.
//!
//! Every connect tears down the previous tunnel client and builds a new
//! one. Each client reports through a sender tagged with its generation,
//! and the event pump drops anything from an older generation.
//!
//! Connect and disconnect share a transition lock. Connect refuses to wait
//! for it, so a connect arriving mid-transition is rejected. Disconnect
//! waits, so it runs once the in-flight connect settles.

use crate::config::TransportMode;
use crate::credentials::Credentials;
use crate::traffic::TrafficBoard;
use crate::tunnel::{TaggedEvent, TunnelClient, TunnelError, TunnelEvent, TunnelEventSender, TunnelFactory};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Connection state observed by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Connecting or disconnecting
    pub fn is_transitioning(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Disconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

/// Opened once the driver and service are verified current
#[derive(Debug, Clone, Default)]
pub struct DependencyGate(Arc<AtomicBool>);

impl DependencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Connect/disconnect errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Tunnel driver or service not found, verify installation")]
    DependenciesMissing,

    #[error("Credentials were issued for '{issued_for}', not '{selected}'")]
    DestinationMismatch { issued_for: String, selected: String },

    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: ConnectionState,
    },

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
}

/// State machine over the tunnel client
pub struct ConnectionController {
    factory: Arc<dyn TunnelFactory>,
    mode: TransportMode,
    gate: DependencyGate,
    state: Arc<watch::Sender<ConnectionState>>,
    /// Generation of the live tunnel client
    generation: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TaggedEvent>,
    /// Transition lock, guarding the bound client
    client: Mutex<Option<Box<dyn TunnelClient>>>,
    pump: JoinHandle<()>,
}

impl ConnectionController {
    /// Create a controller and start its event pump.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        factory: Arc<dyn TunnelFactory>,
        mode: TransportMode,
        gate: DependencyGate,
        traffic: TrafficBoard,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(state);
        let generation = Arc::new(AtomicU64::new(0));
        let (events, rx) = mpsc::unbounded_channel();

        let pump = tokio::spawn(pump_events(rx, state.clone(), generation.clone(), traffic));

        info!("Connection controller ready ({:?} mode)", mode);

        Self {
            factory,
            mode,
            gate,
            state,
            generation,
            events,
            client: Mutex::new(None),
            pump,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn gate(&self) -> &DependencyGate {
        &self.gate
    }

    /// Check connect preconditions without touching anything
    pub fn preflight(&self) -> Result<(), ConnectError> {
        if !self.gate.is_open() {
            return Err(ConnectError::DependenciesMissing);
        }

        let state = self.state();
        if state != ConnectionState::Disconnected {
            return Err(ConnectError::InvalidTransition {
                operation: "connect",
                state,
            });
        }
        Ok(())
    }

    /// Start a tunnel with `credentials` for the `selected` destination.
    ///
    /// Returns once the client has started; `Connected` follows when the
    /// client reports it.
    pub async fn connect(&self, credentials: &Credentials, selected: &str) -> Result<(), ConnectError> {
        let Ok(mut slot) = self.client.try_lock() else {
            let state = self.state();
            warn!("Connect rejected: transition in progress ({})", state);
            return Err(ConnectError::InvalidTransition {
                operation: "connect",
                state,
            });
        };

        if let Err(e) = self.preflight() {
            warn!("Connect rejected: {}", e);
            return Err(e);
        }

        if !credentials.is_issued_for(selected) {
            warn!(
                "Connect rejected: credentials for '{}' but '{}' selected",
                credentials.issued_for, selected
            );
            return Err(ConnectError::DestinationMismatch {
                issued_for: credentials.issued_for.clone(),
                selected: selected.to_string(),
            });
        }

        self.transition(ConnectionState::Connecting);

        // Never reuse a client across connects
        if let Some(mut previous) = slot.take() {
            debug!("Tearing down previous tunnel client");
            if let Err(e) = previous.stop().await {
                debug!("Previous tunnel client did not stop cleanly: {}", e);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let sender = TunnelEventSender::new(generation, self.events.clone());

        let mut client = match self.factory.create(self.mode, sender) {
            Ok(client) => client,
            Err(e) => {
                error!("Could not create tunnel client: {}", e);
                self.abandon();
                return Err(e.into());
            }
        };

        info!(
            "Starting tunnel to {} for '{}' (generation {})",
            credentials.destination_address, credentials.issued_for, generation
        );

        match client.start(&credentials.destination_address, &credentials.secret).await {
            Ok(()) => {
                *slot = Some(client);
                Ok(())
            }
            Err(e) => {
                error!("Tunnel start failed: {}", e);
                self.abandon();
                Err(e.into())
            }
        }
    }

    /// Stop the tunnel. Waits for an in-flight connect first.
    pub async fn disconnect(&self) {
        let mut slot = self.client.lock().await;

        let state = self.state();
        if state == ConnectionState::Disconnected && slot.is_none() {
            debug!("Disconnect ignored: already disconnected");
            return;
        }

        self.transition(ConnectionState::Disconnecting);

        // Silence the client we are about to stop
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut client) = slot.take() {
            if let Err(e) = client.stop().await {
                warn!("Tunnel did not stop cleanly: {}", e);
            }
        }

        self.transition(ConnectionState::Disconnected);
        info!("Disconnected");
    }

    /// Drop events from the failed client and fall back to Disconnected
    fn abandon(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.transition(ConnectionState::Disconnected);
    }

    fn transition(&self, to: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == to {
                return false;
            }
            debug!("Connection state: {} -> {}", current, to);
            *current = to;
            true
        });
    }
}

impl Drop for ConnectionController {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Apply tunnel events from the live generation
async fn pump_events(
    mut rx: mpsc::UnboundedReceiver<TaggedEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    generation: Arc<AtomicU64>,
    traffic: TrafficBoard,
) {
    while let Some((tag, event)) = rx.recv().await {
        if tag != generation.load(Ordering::SeqCst) {
            debug!("Dropping {:?} from stale tunnel generation {}", event, tag);
            continue;
        }

        match event {
            TunnelEvent::Connected => {
                let changed = state.send_if_modified(|current| {
                    if *current != ConnectionState::Connecting {
                        return false;
                    }
                    *current = ConnectionState::Connected;
                    true
                });
                if changed {
                    info!("Tunnel connected");
                }
            }
            TunnelEvent::Disconnected => {
                // Same sequence a user disconnect publishes
                let dropped = state.send_if_modified(|current| {
                    if !matches!(current, ConnectionState::Connecting | ConnectionState::Connected) {
                        return false;
                    }
                    *current = ConnectionState::Disconnecting;
                    true
                });
                if !dropped {
                    continue;
                }
                warn!("Tunnel dropped");

                // Let watchers observe Disconnecting before it settles
                tokio::task::yield_now().await;

                if tag != generation.load(Ordering::SeqCst) {
                    // A disconnect or connect took over meanwhile
                    continue;
                }
                state.send_if_modified(|current| {
                    if *current != ConnectionState::Disconnecting {
                        return false;
                    }
                    *current = ConnectionState::Disconnected;
                    true
                });
            }
            TunnelEvent::StatisticsChanged(stats) => {
                if state.borrow().is_connected() {
                    traffic.publish_counters(stats.bytes_sent, stats.bytes_received);
                }
            }
        }
    }
}
