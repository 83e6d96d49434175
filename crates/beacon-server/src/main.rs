//! # beacon-server
//!
//! HTTP server for the beacon-tracker service.
//!
//! This binary provides:
//! - The background beacon tracking loop
//! - REST API for scanner control, settings and beacon data
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated beacons
//! BEACON_SCANNER__FAKE_SCAN=true BEACON_SCANNER__RUN_FLAG=true cargo run --package beacon-server
//!
//! # Production, with a BlueZ radio
//! cargo build --release --package beacon-server --features bluetooth
//! ./beacon-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use beacon_core::{AppConfig, FileStorage, ScanExecutor};
use beacon_server::api::create_router;
use beacon_server::logging;
use beacon_server::state::AppState;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    logging::init(config.server.production)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting beacon-server");

    let storage = Arc::new(FileStorage::new(config.storage.data_dir.clone()));
    let state = AppState::build(&config, storage, scan_executor().await).await?;
    state.tracker.sync_with_settings().await;

    let app = create_router(Arc::clone(&state));
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.tracker.stop().await;
    info!("beacon-server stopped");
    Ok(())
}

/// Scan executor backed by the BlueZ radio when one can be opened.
#[cfg(feature = "bluetooth")]
async fn scan_executor() -> ScanExecutor {
    match beacon_core::BluezRadio::new().await {
        Ok(radio) => ScanExecutor::new(Arc::new(radio)),
        Err(e) => {
            warn!(error = %e, "Bluetooth radio unavailable, only simulated scans will work");
            ScanExecutor::simulated_only()
        }
    }
}

/// Scan executor without a radio; built without the `bluetooth` feature.
#[cfg(not(feature = "bluetooth"))]
async fn scan_executor() -> ScanExecutor {
    warn!("Built without Bluetooth support, only simulated scans will work");
    ScanExecutor::simulated_only()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
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
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
