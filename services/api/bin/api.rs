//! Main Entrypoint for the Cadence API Service
//!
//! Loads configuration, initializes logging, builds the router and serves it
//! until Ctrl+C.

use anyhow::Context;
use cadence_api::{config::Config, router::create_router, state::AppState};
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Parser)]
#[command(name = "api")]
#[command(about = "Real-time voice conversation service", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to listen on. Overrides BIND_ADDRESS.
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = ?e, "Failed to install Ctrl+C handler.");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
    });

    // --- 3. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 4. Start Server ---
    info!(
        bind_address = %config.bind_address,
        output_sinks = ?config.output_sinks,
        barge_in_min_chars = config.barge_in_min_chars,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
