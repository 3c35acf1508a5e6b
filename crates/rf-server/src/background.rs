//! Periodic maintenance loops run alongside the HTTP server.

use std::time::Duration;

use rf_pipeline::SqliteCacheStore;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Jobs refreshed per sweep.
const SWEEP_BATCH: i64 = 200;

/// Re-mint signed URLs that are about to expire.
///
/// Runs until the cancellation token is triggered.
pub async fn run_url_sweeper(ctx: AppContext, cancel: CancellationToken) {
    let interval = Duration::from_secs(ctx.config.urls.sweep_interval_secs.max(1));
    tracing::info!(interval_secs = interval.as_secs(), "URL sweeper started");

    loop {
        match ctx.service.urls().sweep(SWEEP_BATCH).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!(count, "URL sweep complete"),
            Err(e) => tracing::error!("URL sweep failed: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("URL sweeper stopped");
}

/// Delete expired cache entries and tombstones once an hour.
pub async fn run_cache_purge(ctx: AppContext, cancel: CancellationToken) {
    let interval = Duration::from_secs(3600);
    let cache = SqliteCacheStore::new(ctx.db.clone());

    loop {
        match cache.purge_expired() {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "Purged expired cache entries"),
            Err(e) => tracing::warn!("Cache purge failed: {e}"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }
    }

    tracing::debug!("Cache purge stopped");
}
