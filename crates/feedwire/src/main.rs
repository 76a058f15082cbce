//! # feedwire
//!
//! Server binary: loads settings, wires the hub, breakers and feed pollers
//! together, and serves `WebSocket` clients until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use feedwire_breaker::BreakerRegistry;
use feedwire_hub::{Hub, MemoryCache, spawn_reaper};
use feedwire_server::{FeedwireServer, ServerConfig, build_pollers, http_client};
use feedwire_settings::FeedwireSettings;

/// feedwire market-data fan-out server.
#[derive(Parser, Debug)]
#[command(name = "feedwire", about = "Market-data fan-out server", version)]
struct Cli {
    /// Settings file (defaults to `~/.feedwire/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log level when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Load settings from the file and environment, then apply flags.
    fn resolve_settings(&self) -> Result<FeedwireSettings> {
        let mut settings = match &self.settings {
            Some(path) => feedwire_settings::load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => feedwire_settings::load_settings().with_context(|| {
                format!(
                    "Failed to load settings from {}",
                    feedwire_settings::settings_path().display()
                )
            })?,
        };
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut FeedwireSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = args.resolve_settings()?;

    feedwire_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics_handle = feedwire_server::metrics::install_recorder().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "metrics recorder unavailable, /metrics will be empty");
        feedwire_server::metrics::detached_handle()
    });

    // Core services
    let hub_config = settings.hub.to_config();
    let hub = Arc::new(Hub::new(hub_config.clone()).with_cache(Arc::new(MemoryCache::new())));
    let breakers = Arc::new(BreakerRegistry::new());
    let client = http_client(
        concat!("feedwire/", env!("CARGO_PKG_VERSION")),
        Duration::from_secs(30),
    )
    .context("Failed to build HTTP client")?;
    let pollers = build_pollers(&settings, &hub, &breakers, &client)
        .context("Failed to set up feed pollers")?;

    let server = FeedwireServer::new(
        ServerConfig::from(&settings.server),
        Arc::clone(&hub),
        Arc::clone(&breakers),
        metrics_handle,
    );
    let shutdown = Arc::clone(server.shutdown());

    // Background tasks share the server's shutdown token.
    let mut handles = vec![
        hub.spawn(shutdown.token()),
        spawn_reaper(
            Arc::clone(&hub),
            hub_config.reaper_interval,
            hub_config.inactivity_threshold,
            shutdown.token(),
        ),
    ];
    tracing::info!(feeds = pollers.len(), "starting feed pollers");
    handles.extend(pollers.into_iter().map(|p| p.spawn(shutdown.token())));

    let (addr, server_handle) = server.listen().await.context("Failed to bind listener")?;
    handles.push(server_handle);
    tracing::info!(%addr, "feedwire ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutdown signal received");

    // Stop intake first, then drain what is already queued.
    shutdown.shutdown();
    let report = hub.shutdown().await;
    tracing::info!(
        flushed = report.flushed,
        disconnected = report.disconnected,
        "hub drained"
    );
    breakers.shutdown_all();

    if !shutdown.graceful_shutdown(handles, None).await {
        tracing::warn!("some tasks did not stop in time");
    }
    tracing::info!("feedwire stopped");
    Ok(())
}
