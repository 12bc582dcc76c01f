//! API server entry point.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net::listener ──▶ http::server ──▶ rate limiter ──▶ routes
//!                                            │                              │
//!                                            │                     BackgroundTasks::run
//!                                            ▼                              │
//!     SIGINT/SIGTERM ──▶ lifecycle::Shutdown ──▶ drain connections ──▶ wait tasks ──▶ exit
//! ```

use std::path::PathBuf;

use clap::Parser;

use greenlight_core::config::{load_config, validate_config, watcher::ConfigWatcher, ServerConfig};
use greenlight_core::net::Listener;
use greenlight_core::observability::{logging, metrics};
use greenlight_core::HttpServer;

#[derive(Parser, Debug)]
#[command(name = "greenlight")]
#[command(about = "HTTP API server with per-client rate limiting and graceful shutdown", long_about = None)]
struct Cli {
    /// TOML configuration file; watched for changes while running.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server port
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production)
    #[arg(long)]
    env: Option<String>,

    /// Rate limiter maximum requests per second
    #[arg(long)]
    limiter_rps: Option<f64>,

    /// Rate limiter maximum burst
    #[arg(long)]
    limiter_burst: Option<u32>,

    /// Enable rate limiter
    #[arg(long)]
    limiter_enabled: Option<bool>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.listener.bind_address = format!("0.0.0.0:{port}");
        }
        if let Some(env) = &self.env {
            config.env = env.clone();
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);
    if let Err(errors) = validate_config(&config) {
        for error in &errors {
            eprintln!("invalid configuration: {error}");
        }
        return Err(format!("{} configuration error(s)", errors.len()).into());
    }

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        env = %config.env,
        limiter_rps = config.limiter.requests_per_second,
        limiter_burst = config.limiter.burst,
        drain_timeout_ms = config.shutdown.drain_timeout_ms,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let mut server = HttpServer::new(config.clone())?;
    // Dropping the watcher handle stops the watch, so it lives until shutdown.
    let _watcher = match &cli.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path, config.clone());
            server = server.config_updates(updates);
            Some(watcher.run()?)
        }
        None => None,
    };

    let listener = Listener::bind(&config.listener).await?;
    let report = match server.serve(listener).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            return Err(e.into());
        }
    };

    tracing::info!(
        drain_timed_out = report.drain_timed_out,
        aborted_connections = report.aborted_connections,
        abandoned_tasks = report.abandoned_tasks,
        "Shutdown complete"
    );
    Ok(())
}
