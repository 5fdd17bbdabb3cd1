use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::gate::AdmissionGate;
use turnstile::http::HttpServer;
use turnstile::ratelimit::ClientRegistry;

/// Per-client admission gate for HTTP services.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to a YAML configuration file
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

impl Args {
    fn apply(&self, config: &mut TurnstileConfig) {
        if let Some(port) = self.port {
            config.server.listen_addr = SocketAddr::new(config.server.listen_addr.ip(), port);
        }
        if let Some(env) = &self.env {
            config.server.environment = env.clone();
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst_size = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let policy = config.limiter.policy()?;
    info!(
        listen_addr = %config.server.listen_addr,
        enabled = policy.is_enabled(),
        requests_per_second = policy.requests_per_second(),
        burst_size = policy.burst_size(),
        "Configuration loaded"
    );

    let registry = Arc::new(ClientRegistry::new());
    let janitor = config.limiter.janitor(Arc::clone(&registry))?;
    let gate = Arc::new(AdmissionGate::new(policy, registry));

    let server = HttpServer::new(
        config.server.listen_addr,
        config.server.environment.clone(),
        gate,
        janitor,
    );

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Turnstile stopped");
    Ok(())
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
