//! Search Sync Main Entry Point
//!
//! Initialises or migrates every search app's indices, runs the background
//! sync workers and the change listener, and serves the activity stream
//! until Ctrl-C.

use dotenv::dotenv;
use search_sync::activity_stream::{create_app, run_server};
use search_sync::{Dependencies, SyncError};
use std::env;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("search_sync=info,search_sync_repository=info"));

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "search-sync",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "search-sync",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing();

    info!("Starting Search Sync");

    let deps = match Dependencies::new().await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    // Jobs scheduled by migrate_apps wait in the queue until the workers start.
    if let Err(e) = deps.migrations.migrate_apps(None).await {
        error!(error = %e, "Failed to initialise or migrate search indices");
        return Err(e);
    }

    let queue = deps.queue.clone();
    let workers = tokio::spawn(async move { queue.run().await });

    let (stop_listener, listener_shutdown) = watch::channel(false);
    let listener = tokio::spawn(deps.change_listener.run(deps.changes.clone(), listener_shutdown));

    let app = create_app(deps.activity_stream.clone());
    let served = run_server(app, deps.settings.bind_addr, shutdown_signal()).await;

    stop_listener.send_replace(true);
    if let Err(e) = listener.await {
        error!(error = %e, "Change listener task panicked");
    }

    deps.queue.shutdown();
    match workers.await {
        Ok(Ok(())) => info!("Job workers stopped"),
        Ok(Err(e)) => error!(error = %e, "Job workers failed"),
        Err(e) => error!(error = %e, "Job worker task panicked"),
    }

    match served {
        Ok(()) => {
            info!("Search sync stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Activity stream server failed");
            Err(SyncError::config(format!("Activity stream server failed: {}", e)))
        }
    }
}
