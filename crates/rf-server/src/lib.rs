//! rf-server: HTTP API server and background maintenance.
//!
//! This crate ties the rf-* crates into a running server. It provides:
//!
//! - Axum-based HTTP API over the job store, with OpenAPI docs
//! - Signed media delivery for stored images and videos
//! - Background URL sweeper and cache purge
//! - Resumption of video polling left over from the previous run
//! - Graceful shutdown via signal handling

pub mod background;
pub mod context;
pub mod error;
pub mod router;
pub mod routes;

use std::net::SocketAddr;

use rf_core::config::Config;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Open (or create) the database at `config.server.db_path`.
pub fn open_database(config: &Config) -> rf_core::Result<rf_db::pool::DbPool> {
    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let db = rf_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }
    Ok(db)
}

/// Start the reelforge server.
///
/// Initializes the database and [`AppContext`], resumes pending video jobs,
/// spawns the maintenance loops, and serves HTTP until a shutdown signal is
/// received.
pub async fn start(config: Config) -> rf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db = open_database(&config)?;
    let ctx = AppContext::from_config(config.clone(), db)?;

    match ctx.service.supervisor().resume_pending() {
        Ok(0) => {}
        Ok(n) => tracing::info!("Resumed polling for {n} video job(s)"),
        Err(e) => tracing::error!("Failed to resume pending video jobs: {e}"),
    }

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(background::run_url_sweeper(ctx.clone(), cancel.clone()));
    let purge = tokio::spawn(background::run_cache_purge(ctx.clone(), cancel.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| rf_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| rf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("Starting server on {addr}");
    let app = router::build_router(ctx.clone());
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await;

    // Signal background tasks to stop, then let in-flight polls exit. Jobs
    // still awaiting video stay `processing` and resume on the next start.
    cancel.cancel();
    let _ = tokio::join!(sweeper, purge);
    ctx.service.shutdown().await;

    served.map_err(|e| rf_core::Error::Internal(format!("Server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
