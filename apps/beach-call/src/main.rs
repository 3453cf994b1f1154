use anyhow::{Context, Result};
use beach_call::{config::Cli, config::ServerConfig, routes, telemetry::Telemetry, AppState};
use clap::Parser;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    let telemetry = Telemetry::init(&config.log_filter)?;

    info!(
        listen_addr = %config.listen_addr,
        token_ttl_secs = config.token_ttl.num_seconds(),
        outbound_buffer = config.outbound_buffer,
        "starting beach-call"
    );

    let state = AppState::from_config(&config).with_metrics(telemetry.metrics_handle());
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("beach-call listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
