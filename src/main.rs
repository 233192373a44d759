//! axo-fileman server binary.
//!
//! Serves a directory tree over HTTP for browsing, download and browser
//! uploads, optionally mounted under a URL path prefix. The main entry point
//! parses the CLI, builds the Axum router and runs the listener until a
//! shutdown signal arrives.

mod app;
mod atomic;
mod config;
mod error;
mod etag;
mod files;
mod http;
mod listing;
mod logging;
mod storage;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;

use crate::config::{Args, SHUTDOWN_GRACE_SECS, ServerConfig};
use crate::storage::Storage;

shadow!(build);

/// Starts the file server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let config = ServerConfig::from_args(&args)?;
    let storage = Arc::new(Storage::new(
        config.working_dir.clone(),
        &config.path_prefix,
    ));
    let app = app::build_router(storage, config.upload_max_size);

    let addr = config.socket_addr();
    let handle = Handle::new();

    info!("Running HTTP file server on {}", addr);
    info!("Serving directory: {}", config.working_dir.display());
    info!("Path prefix: {}", config.path_prefix);

    tokio::spawn(shutdown_signal(handle.clone()));
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
