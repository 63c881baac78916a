//! Telecare consultation relay -- real-time chat for video consultations.
//!
//! An axum WebSocket server that groups connections into consultation rooms
//! and broadcasts join, leave and chat events to room members. Nothing is
//! stored: events reach whoever is in the room when they arrive.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000
//! cargo run --bin telecare-relay
//!
//! # Run on custom address
//! cargo run --bin telecare-relay -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! RELAY_ADDR=127.0.0.1:8080 cargo run --bin telecare-relay
//! ```

use std::sync::Arc;

use clap::Parser;
use telecare_relay::config::{self, RelayCliArgs, RelayConfig};
use telecare_relay::relay::{self, RelayState};

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured filter.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match config::config_file_path(&cli) {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "loaded config file");
        }
        Some(path) => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
        }
        None => tracing::debug!("no config directory, using defaults"),
    }

    tracing::info!(
        addr = %config.bind_addr,
        max_payload_size = config.max_payload_size,
        log_level = %config.log_level,
        "starting telecare relay"
    );

    let state = Arc::new(RelayState::with_config(config.max_payload_size));

    let handle = match relay::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await
    {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay listening for consultations");
            handle
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = handle => {
            if let Err(e) = result {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!(
                connections = state.connection_count(),
                rooms = state.rooms.room_count(),
                "shutting down telecare relay"
            );
            state.close_all_connections();
        }
    }
}
