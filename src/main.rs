//! # relaygate
//!
//! Gateway binary: loads settings, wires the session registry to the sidecar
//! transport and serves the HTTP/WebSocket API.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use relaygate_server::ServerConfig;
use relaygate_sessions::{
    EventRelay, ObserverHub, OutboundDispatcher, SessionPolicy, SessionRegistry, WebhookClient,
    WebhookConfig,
};
use relaygate_telemetry::TelemetryConfig;
use relaygate_transport::SidecarTransportFactory;

/// Multi-tenant messaging gateway.
#[derive(Parser, Debug)]
#[command(name = "relaygate", about = "Multi-tenant messaging gateway")]
struct Cli {
    /// Settings file (defaults to `~/.relaygate/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = relaygate_settings::load_settings(cli.config.as_deref())
        .context("Failed to load settings")?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let telemetry = relaygate_telemetry::init_telemetry(TelemetryConfig::from_levels(
        &settings.logging.level,
        &settings.logging.module_levels,
        settings.logging.json || cli.json_logs,
    ));

    let webhook = match WebhookConfig::from_settings(&settings.backend) {
        Some(config) => {
            let client = WebhookClient::new(config).context("Failed to build webhook client")?;
            tracing::info!(url = client.url(), "backend webhook enabled");
            Some(client)
        }
        None => {
            tracing::warn!("no backend URL configured, inbound messages reach observers only");
            None
        }
    };

    let hub = Arc::new(ObserverHub::new(settings.sessions.observer_buffer));
    let relay = Arc::new(EventRelay::new(hub, webhook));
    let factory = Arc::new(SidecarTransportFactory::from_settings(&settings.transport));
    let registry = Arc::new(SessionRegistry::new(
        factory,
        relay,
        SessionPolicy::from(&settings.sessions),
    ));
    let dispatcher = Arc::new(OutboundDispatcher::new(
        Arc::clone(&registry),
        settings.transport.address_suffix.clone(),
    ));

    let handle = relaygate_server::start(
        ServerConfig::from(&settings.server),
        Arc::clone(&registry),
        dispatcher,
        telemetry.prometheus(),
    )
    .await
    .context("Failed to start server")?;

    tracing::info!(
        port = handle.port,
        sidecar = %settings.transport.sidecar_url,
        "relaygate ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!(sessions = registry.len(), "shutting down");
    registry.shutdown().await;
    handle.shutdown(Duration::from_secs(5)).await;
    Ok(())
}
