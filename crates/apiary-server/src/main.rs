//! # Apiary Server
//!
//! Loads configuration, registers the handler manifest and runs every
//! queue with a bound handler against Redis until SIGINT or SIGTERM.

use anyhow::Context;
use apiary_config::{ConfigLoader, MetricsConfig};
use apiary_core::init_telemetry;
use apiary_jobs::{QueueService, RedisBroker};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod handlers;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader = ConfigLoader::from_default_location().context("Failed to load configuration")?;
    let config = loader.get().await;

    init_telemetry(&config.logging)?;

    info!("Starting Apiary queue server...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    if config.metrics.enabled {
        install_metrics_exporter(&config.metrics)?;
    }

    info!(
        "Handler modules are looked up under {}",
        QueueService::discovery_pattern(&config.app.app_dir).display()
    );

    let service = QueueService::builder(config.bee.clone(), Arc::new(RedisBroker::new()))
        .manifest(handlers::manifest())
        .build();

    let running = service.run().await.context("Failed to start queues")?;
    info!("{} queues running", running.len());

    shutdown_signal().await;

    for queue in &running {
        queue.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}

fn install_metrics_exporter(config: &MetricsConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid metrics listen address: {}", config.listen_addr))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
