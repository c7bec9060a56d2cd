//! TunnelGate: command-line VPN client
//!
//! Usage: `tunnelgate [config.toml|config.json] [destination]`
//!
//! Verifies the driver and service, logs in, connects to the destination
//! (or the first one the backend lists) and reports state until Ctrl-C.

mod process_tunnel;
mod prompt;

use anyhow::{Context, Result, bail};
use process_tunnel::ProcessTunnelFactory;
use prompt::StdinPrompt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tg_network::AuthMethod;
use tg_vpn::{Collaborators, ConnectionState, LoginCredentials, Orchestrator, OrchestratorConfig};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const DEFAULT_CONFIG: &str = "tunnelgate.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("TunnelGate starting...");

    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let wanted = args.next();

    let config = load_config(&config_path)?;
    let tunnels = Arc::new(ProcessTunnelFactory::new(config.tunnel.clone()));
    let collaborators = Collaborators::from_config(&config, tunnels)?;
    let orchestrator = Orchestrator::new(config, collaborators)?;

    startup_gate(&orchestrator).await?;

    let credentials = login_credentials(&orchestrator).await?;
    let session = orchestrator
        .login(credentials.as_ref(), &StdinPrompt)
        .await
        .context("login failed")?;
    info!("Logged in as device {}", session.device_id);

    let result = run(&orchestrator, wanted).await;

    orchestrator.logout().await;
    info!("TunnelGate shutting down");
    result
}

fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if path.exists() {
        return OrchestratorConfig::load(path)
            .with_context(|| format!("loading {}", path.display()));
    }

    warn!("{} not found, using defaults", path.display());
    Ok(OrchestratorConfig::default())
}

/// Verify or install the driver and service; the user may retry or abort
async fn startup_gate(orchestrator: &Orchestrator) -> Result<()> {
    loop {
        match orchestrator.ensure_dependencies().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                error!("{}", e);
                if !prompt::confirm("Installation failed. Retry? [y/N] ").await {
                    bail!("startup aborted: {}", e);
                }
            }
        }
    }
}

async fn login_credentials(orchestrator: &Orchestrator) -> Result<Option<LoginCredentials>> {
    if orchestrator.config().auth == AuthMethod::Anonymous {
        return Ok(None);
    }

    let login = match std::env::var("TG_LOGIN") {
        Ok(login) => login,
        Err(_) => prompt::ask("Login: ").await.context("login required")?,
    };
    let password = match std::env::var("TG_PASSWORD") {
        Ok(password) => password,
        Err(_) => prompt::ask("Password: ").await.context("password required")?,
    };

    Ok(Some(LoginCredentials::new(login, password)))
}

/// Connect and report until Ctrl-C or the tunnel drops
async fn run(orchestrator: &Orchestrator, wanted: Option<String>) -> Result<()> {
    let destinations = orchestrator.destinations().await?;
    for destination in &destinations {
        info!("  {} ({} servers)", destination.code, destination.servers);
    }

    let destination = wanted
        .or_else(|| destinations.first().map(|d| d.code.clone()))
        .context("no destinations available")?;

    orchestrator.select_destination(&destination).await;
    orchestrator.connect().await?;

    let mut state = orchestrator.state();
    let mut traffic = orchestrator.traffic();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                info!("State: {}", current);
                if current == ConnectionState::Disconnected {
                    warn!("Tunnel is down");
                    break;
                }
            }
            changed = traffic.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *traffic.borrow_and_update();
                info!("Traffic: {}", snapshot.format());
            }
        }
    }

    orchestrator.disconnect().await;
    Ok(())
}
