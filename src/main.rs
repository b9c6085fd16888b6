use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderName;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratewarden::config::RatewardenConfig;
use ratewarden::http::{build_router, HttpServer};
use ratewarden::ratelimit::{AdmissionPolicy, Sweeper, WindowStore};

/// In-process sliding-window rate limiter.
#[derive(Debug, Parser)]
#[command(name = "ratewarden", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RatewardenConfig::from_file(path)?,
        None => RatewardenConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.http_addr = listen;
    }

    init_tracing(config.server.log_json);

    info!("Starting Ratewarden Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, rules = config.rules.len(), "Configuration loaded");

    let rules = config.rule_set()?;
    let store = Arc::new(WindowStore::new(config.rate_limiting.store_options()));
    let policy = AdmissionPolicy::new(Arc::clone(&store))
        .with_trust_forwarded_for(config.rate_limiting.trust_forwarded_for);

    let principal_header = config
        .server
        .principal_header
        .as_deref()
        .map(HeaderName::try_from)
        .transpose()?;

    let router = build_router(&policy, &rules, principal_header)?;
    let sweeper = Sweeper::start(Arc::clone(&store), config.rate_limiting.sweep_interval());

    HttpServer::new(config.server.http_addr, router)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    sweeper.stop().await;

    info!("Ratewarden Rate Limiting Service stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
