//! Tracking facade
//!
//! HTTP front for a tracking store: experiments, runs, parameters, metrics,
//! tags and artifacts, with every store call offloaded to a bounded pool of
//! blocking workers.

pub mod config;
pub mod dto;
mod error;
mod handlers;
pub mod pool;
mod routes;
mod state;
pub mod tracker;

pub use config::{FacadeConfig, StoreConfig};
pub use error::FacadeError;
pub use routes::create_router;
pub use state::AppState;
pub use tracker::{RunWriter, Tracker};

use std::sync::Arc;
use tracing::info;

/// Bind to the configured address and serve until ctrl+c.
pub async fn serve(config: FacadeConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.scratch_dir)?;

    let state = Arc::new(AppState::new(&config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.address()).await?;
    info!(
        address = %listener.local_addr()?,
        store = ?config.store,
        workers = config.workers,
        store_timeout = ?config.store_timeout,
        scratch_dir = %config.scratch_dir.display(),
        "Tracking facade listening"
    );

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping facade gracefully");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Tracking facade shut down cleanly");
    Ok(())
}
