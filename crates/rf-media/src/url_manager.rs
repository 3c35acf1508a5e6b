//! Signed-URL lifecycle.
//!
//! The URL manager is the only component that decides whether a stored
//! URL is stale. It is called on every read path, so callers never see an
//! expired link, and periodically by the server's sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rf_core::config::UrlConfig;
use rf_core::events::{EventBus, EventPayload};
use rf_core::{JobId, MediaKind, Result};
use rf_db::models::GenerationJob;
use rf_db::pool::{get_conn, DbPool};
use rf_db::queries::jobs;

use crate::storage::ObjectStore;

/// True when `expiry` is absent or falls within `buffer` of `now`.
pub fn needs_refresh(
    expiry: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    buffer: chrono::Duration,
) -> bool {
    match expiry {
        None => true,
        Some(at) => at <= now + buffer,
    }
}

pub struct UrlManager {
    db: DbPool,
    store: Arc<dyn ObjectStore>,
    buffer: chrono::Duration,
    ttl: Duration,
    events: Option<Arc<EventBus>>,
}

impl UrlManager {
    pub fn new(db: DbPool, store: Arc<dyn ObjectStore>, config: &UrlConfig) -> Self {
        Self {
            db,
            store,
            buffer: chrono::Duration::seconds(config.refresh_buffer_secs as i64),
            ttl: Duration::from_secs(config.refreshed_url_ttl_secs),
            events: None,
        }
    }

    /// Publish `JobUrlsRefreshed` events on the given bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_stale(&self, expiry: Option<DateTime<Utc>>) -> bool {
        needs_refresh(expiry, Utc::now(), self.buffer)
    }

    /// Re-mint only the URLs of `job` that are stale, persist them, and
    /// return the updated record. Fresh URLs are left untouched.
    pub async fn refresh_if_needed(&self, mut job: GenerationJob) -> Result<GenerationJob> {
        let stale: Vec<MediaKind> = MediaKind::ALL
            .into_iter()
            .filter(|kind| {
                let slot = job.slot(*kind);
                slot.path.is_some() && (slot.url.is_none() || self.is_stale(slot.url_expiry))
            })
            .collect();

        if stale.is_empty() {
            return Ok(job);
        }

        self.remint(&mut job, &stale)?;
        Ok(job)
    }

    /// Unconditionally re-mint every URL of a job.
    pub async fn force_refresh(&self, job_id: JobId) -> Result<GenerationJob> {
        let mut job = {
            let conn = get_conn(&self.db)?;
            jobs::require_job(&conn, job_id)?
        };

        let kinds: Vec<MediaKind> = MediaKind::ALL
            .into_iter()
            .filter(|kind| job.slot(*kind).path.is_some())
            .collect();
        self.remint(&mut job, &kinds)?;
        Ok(job)
    }

    /// Apply [`refresh_if_needed`](Self::refresh_if_needed) to many jobs
    /// concurrently. A job whose refresh fails is returned as it was.
    pub async fn refresh_many(&self, list: Vec<GenerationJob>) -> Vec<GenerationJob> {
        let futures = list.into_iter().map(|job| async move {
            let fallback = job.clone();
            match self.refresh_if_needed(job).await {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(job_id = %fallback.id, "URL refresh failed: {e}");
                    fallback
                }
            }
        });
        join_all(futures).await
    }

    /// Refresh every job whose URLs expire within the buffer.
    ///
    /// Returns the number of jobs that were touched.
    pub async fn sweep(&self, limit: i64) -> Result<usize> {
        let candidates = {
            let conn = get_conn(&self.db)?;
            jobs::list_jobs_with_expiring_urls(&conn, Utc::now() + self.buffer, limit)?
        };
        let count = candidates.len();
        if count > 0 {
            self.refresh_many(candidates).await;
            tracing::info!(count, "URL sweep refreshed jobs");
        }
        Ok(count)
    }

    fn remint(&self, job: &mut GenerationJob, kinds: &[MediaKind]) -> Result<()> {
        let conn = get_conn(&self.db)?;
        let mut refreshed = 0;

        for kind in kinds {
            let Some(path) = job.slot(*kind).path.clone() else {
                continue;
            };
            let signed = self.store.sign_url(&path, self.ttl)?;
            jobs::set_media_url(&conn, job.id, *kind, &signed.url, signed.expires_at)?;

            let slot = job.slot_mut(*kind);
            slot.url = Some(signed.url);
            slot.url_expiry = Some(signed.expires_at);
            refreshed += 1;
        }

        tracing::debug!(job_id = %job.id, refreshed, "Refreshed signed URLs");
        if let Some(events) = &self.events {
            events.publish(EventPayload::JobUrlsRefreshed {
                job_id: job.id,
                refreshed,
            });
        }
        Ok(())
    }
}
