//! Observing forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                    TAP PROXY                     │
//!                    │                                                  │
//!   Client Request   │  ┌─────────┐   ┌─────────┐   ┌──────────────┐    │
//!   ─────────────────┼─▶│  axum   │──▶│ rewrite │──▶│ tee request  │────┼──▶ Upstream
//!                    │  │ server  │   │   URL   │   │    body      │    │
//!                    │  └─────────┘   └─────────┘   └──────────────┘    │
//!                    │                                                  │
//!   Client Response  │  ┌──────────────┐   ┌────────────────────────┐   │
//!   ◀────────────────┼──│ tee response │◀──│ pooled transport       │◀──┼─── Upstream
//!                    │  │    body      │   │ (header-wait timeout)  │   │
//!                    │  └──────┬───────┘   └────────────────────────┘   │
//!                    │         │ one record per request                 │
//!                    │         ▼                                        │
//!                    │  ┌──────────────┐   ┌────────────────────────┐   │
//!                    │  │ observation  │──▶│ consumer (log drain)   │   │
//!                    │  │    sink      │   └────────────────────────┘   │
//!                    │  └──────────────┘                                │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use tap_proxy::config::loader::{read_config, ConfigError};
use tap_proxy::config::validation::validate_config;
use tap_proxy::config::ProxyConfig;
use tap_proxy::lifecycle::{signals, Shutdown};
use tap_proxy::observability::{logging, metrics};
use tap_proxy::observation::{consumer, ObservationSink};
use tap_proxy::HttpServer;

const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "tap-proxy")]
#[command(about = "Forward proxy that records every request it relays", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream base URL, overrides `upstream.target_url`.
    #[arg(short, long)]
    target: Option<String>,

    /// Upstream timeout in milliseconds, overrides `upstream.timeout_ms`.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Listen address, overrides `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ProxyConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(target) = self.target {
            config.upstream.target_url = target;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.upstream.timeout_ms = timeout_ms;
        }
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }

        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;

    logging::init_logging(&config.observability);

    tracing::info!("tap-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        target_url = %config.upstream.target_url,
        timeout_ms = config.upstream.timeout_ms,
        channel_capacity = config.observation.channel_capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let (sink, records) = ObservationSink::channel(
        config.observation.channel_capacity,
        Duration::from_millis(config.observation.publish_timeout_ms),
    );
    let drain = tokio::spawn(consumer::log_observations(
        records,
        config.observation.log_bodies,
    ));

    let server = HttpServer::new(&config, sink)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    tokio::spawn(signals::trigger_on_signal(shutdown.clone()));

    server.run(listener, shutdown.subscribe()).await?;

    // The server held the last sink; the drain ends once queued records are logged.
    match tokio::time::timeout(DRAIN_GRACE, drain).await {
        Ok(Ok(consumed)) => tracing::info!(consumed, "Observation drain finished"),
        Ok(Err(e)) => tracing::error!(error = %e, "Observation drain panicked"),
        Err(_) => tracing::warn!(grace = ?DRAIN_GRACE, "Observation drain did not finish in time"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
