//! hnc-manager: hierarchical namespace controller
//!
//! Hosts the platform store, runs the hierarchy, anchor, object,
//! configuration and quota reconcilers, and serves the admission webhooks
//! and the aggregated reader until SIGINT/SIGTERM.

use clap::Parser;
use hnc_daemon::{DaemonConfig, DaemonError, DaemonResult, Server};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "hnc-manager")]
#[command(about = "Hierarchical namespace controller", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HNC_CONFIG")]
    config: Option<String>,

    /// Admission webhook listen address
    #[arg(long, env = "HNC_WEBHOOK_LISTEN")]
    webhook_listen: Option<SocketAddr>,

    /// Aggregated reader listen address
    #[arg(long, env = "HNC_READER_LISTEN")]
    reader_listen: Option<SocketAddr>,

    /// Objects to load into the store at boot
    #[arg(long, env = "HNC_SEED_MANIFESTS")]
    seed_manifests: Option<String>,

    /// Workers per reconciler
    #[arg(long, env = "HNC_WORKERS")]
    workers: Option<usize>,

    /// Enable hierarchical resource quotas
    #[arg(long)]
    enable_hrq: bool,

    /// Log level
    #[arg(long, env = "HNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "HNC_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Override with CLI args
    if let Some(addr) = cli.webhook_listen {
        config.webhook.listen_addr = addr;
    }
    if let Some(addr) = cli.reader_listen {
        config.reader.listen_addr = addr;
    }
    if let Some(path) = cli.seed_manifests {
        config.seed_manifests = Some(path);
    }
    if let Some(workers) = cli.workers {
        config.controllers.workers = workers;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.hnc.enable_hrq |= cli.enable_hrq;
    config.logging.json |= cli.log_json;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        webhook = %config.webhook.listen_addr,
        reader = %config.reader.listen_addr,
        reader_enabled = config.reader.enabled,
        excluded = ?config.hnc.excluded_namespaces,
        hrq = config.hnc.enable_hrq,
        "Starting HNC manager"
    );

    let server = Server::new(config).await?;
    server.run().await
}
