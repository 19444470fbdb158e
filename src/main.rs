//! kube-rbac-gate - Kubernetes RBAC forward-auth gate

use clap::Parser;
use kube_rbac_gate::metrics::server::MetricsServer;
use kube_rbac_gate::{config::Config, server::Server};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// kube-rbac-gate - authorize HTTP requests with Kubernetes RBAC
#[derive(Parser, Debug)]
#[command(name = "kube-rbac-gate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting kube-rbac-gate v{}", kube_rbac_gate::VERSION);

    let config = Config::load(&args.config)?;

    let mut metrics_server = if config.metrics.enabled {
        let mut server = MetricsServer::on_port(config.metrics.port);
        server.start().await?;
        Some(server)
    } else {
        None
    };

    let server = Server::from_config(&config).await?;
    let result = server.run().await;

    if let Some(metrics_server) = metrics_server.as_mut() {
        metrics_server.shutdown().await;
    }
    result?;

    Ok(())
}
