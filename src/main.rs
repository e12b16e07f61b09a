mod cloud;
mod config;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cloud::client::PropertyPublisher;
use crate::cloud::token::TokenProvider;
use crate::http::server::AppState;

#[tokio::main]
async fn main() {
    let (filter, dotenv) = load_env_then_filter(dotenvy::dotenv, EnvFilter::DEFAULT_ENV);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // A missing .env file is not an error
    if let Err(e) = dotenv
        && !e.not_found()
    {
        warn!("Failed to load .env file: {}", e);
    }

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting door bridge (api={}, thing={}, property={} [{:?}])",
        config.cloud.api_url,
        config.device.thing_id,
        config.device.property_id,
        config.device.property_type,
    );

    let http_client = match cloud::build_http_client(config.cloud.timeout()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let tokens = Arc::new(TokenProvider::new(http_client.clone(), config.cloud.clone()));

    // Authenticate once; on failure keep serving in a degraded state
    match tokens.authenticate().await {
        Ok(_) => info!("Authenticated with Arduino IoT Cloud"),
        Err(e) => error!(
            "Authentication failed: {}. Continuing unauthenticated, publishes will be refused",
            e
        ),
    }

    let publisher = PropertyPublisher::new(
        http_client,
        tokens,
        config.device.clone(),
        &config.cloud.api_url,
    );

    let addr = SocketAddr::new(config.http.listen_host, config.http.listen_port);
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = http::server::serve(listener, AppState::new(publisher), shutdown_signal()).await
    {
        error!("HTTP server error: {}", e);
        std::process::exit(1);
    }

    info!("door bridge stopped");
}

/// Run the `.env` loader, then build the log filter from `filter_var`.
///
/// The loader runs first so a `RUST_LOG` set only in `.env` still applies.
fn load_env_then_filter<T>(
    load: impl FnOnce() -> dotenvy::Result<T>,
    filter_var: &str,
) -> (EnvFilter, dotenvy::Result<T>) {
    let loaded = load();
    let filter = EnvFilter::try_from_env(filter_var).unwrap_or_else(|_| EnvFilter::new("info"));
    (filter, loaded)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
