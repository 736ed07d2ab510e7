use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

use rusty_relay::auth::TokenManager;
use rusty_relay::config::ServerConfig;
use rusty_relay::core::Gateway;
use rusty_relay::handlers::routes;
use rusty_relay::storage::InMemoryStore;

#[tokio::main]
async fn main() {
    // Load .env before the logger so RUST_LOG can come from it
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}", config.host, config.port);
    info!("Thresholds: {:?}", config.thresholds);

    let tokens = Arc::new(TokenManager::new(&config.jwt_secret));
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(Gateway::new(&config, tokens, store.clone(), store));

    if let Err(e) = gateway.start_cleanup() {
        error!("Failed to start cleanup sweep: {}", e);
        std::process::exit(1);
    }

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };

    let (bound, server) = match warp::serve(routes(gateway.clone()))
        .try_bind_with_graceful_shutdown(addr, shutdown)
    {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("Starting Rusty Relay server on {}", bound);
    server.await;

    if let Err(e) = gateway.shutdown() {
        error!("Error during shutdown: {}", e);
    }
    info!("Server stopped");
}
