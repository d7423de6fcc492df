//! Arutala Server
//!
//! Loads the configured classifier once, then serves predictions over HTTP.

use anyhow::Result;
use arutala_server::{create_router, AppState, Cli, ServerConfig};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting Arutala Server");

    let config = ServerConfig::load(&cli)?;
    info!("Configuration loaded successfully");
    info!("Model: {}", config.model);
    info!("Device: {}", config.device);

    let metrics_handle = init_metrics()?;

    // Loading blocks on hub downloads and weight mapping
    let state = tokio::task::spawn_blocking(move || AppState::load(config, Some(metrics_handle)))
        .await??;

    let addr: SocketAddr = format!("{}:{}", cli.listen, cli.port).parse()?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("arutala=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arutala=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus recorder and return the handle for `/metrics`
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "arutala_requests_total",
        "Total number of prediction requests by route"
    );
    metrics::describe_counter!(
        "arutala_predictions_total",
        "Total number of images classified"
    );
    metrics::describe_counter!("arutala_errors_total", "Total number of failed requests by type");
    metrics::describe_histogram!(
        "arutala_inference_latency_us",
        metrics::Unit::Microseconds,
        "Decode, transform and forward latency in microseconds by route"
    );

    info!("Metrics exporter initialized");
    Ok(handle)
}
