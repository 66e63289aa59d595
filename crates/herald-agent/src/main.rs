//! Herald entry point: settings, logging, registries, reaper, server, and
//! signal handling.

#![deny(unsafe_code)]

mod presenter;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use herald_registry::{ExpiryReaper, NotificationRegistry, Presenter, RegistryConfig, SessionRegistry};
use herald_server::{HeraldServer, ServerConfig};
use herald_settings::{HeraldSettings, PresenterKind};

use crate::presenter::{LogPresenter, TerminalPresenter};

#[derive(Parser, Debug)]
#[command(name = "herald", about = "WebSocket notification bridge")]
struct Cli {
    /// Settings file (default: ~/.herald/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host, overriding settings.
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overriding settings.
    #[arg(long)]
    port: Option<u16>,
}

fn server_config(settings: &HeraldSettings, cli: &Cli) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: cli.host.clone().unwrap_or_else(|| server.host.clone()),
        port: cli.port.unwrap_or(server.port),
        session_capacity: settings.registry.session_capacity,
        max_message_size: server.max_message_bytes,
        heartbeat_interval_ms: server.heartbeat_interval_ms,
        heartbeat_timeout_ms: server.heartbeat_timeout_ms,
        ..ServerConfig::default()
    }
}

fn registry_config(settings: &HeraldSettings) -> RegistryConfig {
    let registry = &settings.registry;
    RegistryConfig {
        session_capacity: registry.session_capacity,
        notification_capacity: registry.notification_capacity,
        expiry_enabled: registry.expiry_enabled,
        reaper_max_wait_secs: registry.reaper_max_wait_secs,
    }
}

fn build_presenter(kind: PresenterKind) -> Arc<dyn Presenter> {
    match kind {
        PresenterKind::Terminal => Arc::new(TerminalPresenter::stdout()),
        PresenterKind::Log => Arc::new(LogPresenter),
    }
}

/// Stop requests: Ctrl-C everywhere, plus SIGTERM on Unix.
struct StopSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl StopSignals {
    fn register() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("Failed to register SIGTERM handler")?,
        })
    }

    /// Wait for the next stop request and name the signal.
    async fn next(&mut self) -> Result<&'static str> {
        #[cfg(unix)]
        let terminate = self.terminate.recv();
        #[cfg(not(unix))]
        let terminate = std::future::pending::<Option<()>>();

        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("Failed to listen for ctrl-c")?;
                Ok("SIGINT")
            }
            _ = terminate => Ok("SIGTERM"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(herald_settings::settings_path);
    let settings = herald_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;

    herald_logging::init_subscriber(&settings.logging.level, settings.logging.format)
        .context("Failed to initialise logging")?;
    let metrics = herald_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let registry = registry_config(&settings);
    let notifications = Arc::new(NotificationRegistry::new(
        registry.notification_capacity,
        registry.expiry_enabled,
    ));
    let sessions = Arc::new(SessionRegistry::new(notifications));
    let presenter = build_presenter(settings.presenter.kind);
    tracing::debug!(presenter = presenter.name(), ?registry, "registries ready");

    let server = HeraldServer::new(
        server_config(&settings, &cli),
        Arc::clone(&sessions),
        presenter,
        Some(metrics),
    );

    let mut handles = Vec::new();
    if registry.expiry_enabled {
        handles.push(
            ExpiryReaper::new(Arc::clone(&sessions), registry.reaper_max_wait())
                .spawn(server.shutdown().token()),
        );
    } else {
        tracing::info!("notification expiry disabled");
    }

    let mut signals = StopSignals::register()?;
    let (addr, serve) = server.listen().await.context("Failed to start server")?;
    handles.push(serve);

    tracing::info!("herald listening on ws://{addr}");
    tracing::info!("press Ctrl-C to stop");

    let signal = signals.next().await?;
    tracing::info!(signal, "shutting down (press Ctrl-C again to force exit)");

    tokio::select! {
        _ = server.shutdown_gracefully(handles, Some(settings.shutdown.timeout())) => {}
        Ok(signal) = signals.next() => {
            tracing::warn!(signal, "second interrupt received, forcing exit");
        }
    }
    Ok(())
}
