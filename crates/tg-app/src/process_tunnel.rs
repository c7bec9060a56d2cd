//! Process-backed tunnel client.
//!
//! Runs the configured tunnel executable as
//! `<executable> [args..] [--bypass <domain>..] --service|--direct <address>`
//! with the secret in `TG_TUNNEL_SECRET`. The tunnel counts as connected once the process is
//! spawned and as disconnected when it exits.

use async_trait::async_trait;
use std::process::Stdio;
use tg_vpn::{
    TransportMode, TunnelClient, TunnelError, TunnelEvent, TunnelEventSender, TunnelFactory,
    TunnelSettings,
};
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Environment variable carrying the tunnel secret
pub const SECRET_ENV: &str = "TG_TUNNEL_SECRET";

pub struct ProcessTunnelFactory {
    settings: TunnelSettings,
}

impl ProcessTunnelFactory {
    pub fn new(settings: TunnelSettings) -> Self {
        Self { settings }
    }
}

impl TunnelFactory for ProcessTunnelFactory {
    fn create(
        &self,
        mode: TransportMode,
        events: TunnelEventSender,
    ) -> Result<Box<dyn TunnelClient>, TunnelError> {
        Ok(Box::new(ProcessTunnel {
            settings: self.settings.clone(),
            mode,
            events,
            running: None,
        }))
    }
}

struct Running {
    kill: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

pub struct ProcessTunnel {
    settings: TunnelSettings,
    mode: TransportMode,
    events: TunnelEventSender,
    running: Option<Running>,
}

fn mode_flag(mode: TransportMode) -> &'static str {
    match mode {
        TransportMode::Service => "--service",
        TransportMode::Direct => "--direct",
    }
}

impl ProcessTunnel {
    fn command(&self, address: &str, secret: &str) -> Command {
        let mut cmd = Command::new(&self.settings.executable);
        cmd.args(&self.settings.args);
        for domain in self.settings.bypass() {
            cmd.arg("--bypass").arg(domain);
        }
        cmd.arg(mode_flag(self.mode))
            .arg(address)
            .env(SECRET_ENV, secret)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TunnelClient for ProcessTunnel {
    async fn start(&mut self, address: &str, secret: &str) -> Result<(), TunnelError> {
        if self.running.is_some() {
            return Err(TunnelError::StartFailed("tunnel process already running".into()));
        }

        let mut child = self.command(address, secret).spawn().map_err(|e| {
            TunnelError::StartFailed(format!("{}: {}", self.settings.executable.display(), e))
        })?;

        info!("Tunnel process started (pid {:?})", child.id());
        self.events.send(TunnelEvent::Connected);

        let (kill, kill_rx) = oneshot::channel();
        let events = self.events.clone();

        let watcher = tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };

            match exited {
                Some(Ok(status)) => warn!("Tunnel process exited ({})", status),
                Some(Err(e)) => warn!("Lost track of tunnel process: {}", e),
                None => {
                    if let Err(e) = child.kill().await {
                        warn!("Could not kill tunnel process: {}", e);
                    }
                    debug!("Tunnel process stopped");
                }
            }

            events.send(TunnelEvent::Disconnected);
        });

        self.running = Some(Running { kill, watcher });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TunnelError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        // Fails only when the process already exited
        let _ = running.kill.send(());

        running
            .watcher
            .await
            .map_err(|e| TunnelError::StopFailed(e.to_string()))
    }
}
