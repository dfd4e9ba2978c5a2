//! # rollcall-server
//!
//! HTTP server for the rollcall proximity attendance system.
//!
//! This binary provides:
//! - REST API for advertising, scanning and proxy reconciliation
//! - OpenAPI document at `/api/openapi.json`
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development (in-memory radio)
//! cargo run --package rollcall-server
//!
//! # With a BlueZ adapter
//! cargo run --package rollcall-server --features bluetooth
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use rollcall_core::RollcallConfig;
use rollcall_server::api;
use rollcall_server::logging;
use rollcall_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RollcallConfig::load().context("Failed to load configuration")?;
    logging::init(config.server.production_logging)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rollcall-server");

    let state = build_state(config.clone()).await?.shared();
    let app = api::create_router(state);

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("rollcall-server stopped");
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn build_state(config: RollcallConfig) -> anyhow::Result<AppState> {
    let radio = std::sync::Arc::new(
        rollcall_core::BluezRadio::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let sink = rollcall_server::state::attendance_sink(&config);
    Ok(AppState::new(config, radio.clone(), radio, sink))
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn build_state(config: RollcallConfig) -> anyhow::Result<AppState> {
    tracing::warn!("Built without the `bluetooth` feature; using an in-memory radio");
    Ok(AppState::with_mock_radio(config).0)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
