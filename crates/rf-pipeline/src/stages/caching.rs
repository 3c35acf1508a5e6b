//! Cache lookup at the head of the pipeline and cache write at its tail.
//!
//! Cache backend failures never fail a run: a lookup error is treated as a
//! miss and a write error is logged.

use std::sync::Arc;

use async_trait::async_trait;
use rf_core::config::CacheConfig;
use rf_core::{JobId, StageId, VideoStatus};

use crate::cache::{CacheSnapshot, CacheStore};
use crate::context::GenerationContext;
use crate::fingerprint::fingerprint;
use crate::middleware::{Middleware, StageError};
use crate::poller::{VideoSettlement, VideoTaskSupervisor};

/// Looks up a previous result for the same NFT and prompt prefix.
pub struct CachingStage {
    cache: Arc<dyn CacheStore>,
    config: CacheConfig,
    op: String,
}

impl CachingStage {
    /// `op` names the pipeline so different configurations never share
    /// entries.
    pub fn new(cache: Arc<dyn CacheStore>, config: CacheConfig, op: impl Into<String>) -> Self {
        Self {
            cache,
            config,
            op: op.into(),
        }
    }
}

#[async_trait]
impl Middleware for CachingStage {
    fn stage(&self) -> StageId {
        StageId::Caching
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        if !self.config.enabled {
            return Ok(());
        }
        let (Some(nft_id), Some(prompt)) = (ctx.nft_id.as_deref(), ctx.user_prompt.as_deref())
        else {
            tracing::debug!("No nftId/userPrompt; skipping cache lookup");
            return Ok(());
        };

        let key = fingerprint(&self.op, nft_id, prompt, self.config.prompt_prefix_len);
        ctx.metadata.cache_key = Some(key.clone());

        if ctx.options.skip_cache {
            tracing::debug!(cache_key = %key, "Cache lookup skipped by request");
            return Ok(());
        }

        let cached = match self.cache.get(&key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(cache_key = %key, "Cache lookup failed, treating as miss: {e}");
                None
            }
        };

        match cached.map(CacheSnapshot::from_value) {
            Some(Ok(snapshot)) => {
                tracing::info!(cache_key = %key, "Cache hit");
                snapshot.apply(ctx);
                ctx.metadata.cache_hit = true;
            }
            Some(Err(e)) => {
                tracing::warn!(cache_key = %key, "Ignoring unreadable cache entry: {e}");
            }
            None => {
                tracing::debug!(cache_key = %key, "Cache miss");
            }
        }
        Ok(())
    }

    /// A later stage failed: make sure no entry for this key survives.
    async fn rollback(&self, ctx: &mut GenerationContext) -> rf_core::Result<()> {
        if let Some(key) = ctx.metadata.cache_key.as_deref() {
            tracing::info!(cache_key = %key, "Tombstoning cache entry after failed run");
            self.cache.invalidate(key).await?;
        }
        Ok(())
    }

    fn weight(&self) -> f32 {
        0.2
    }
}

/// Snapshots a clean, freshly generated result under the lookup key.
pub struct CacheSaveStage {
    cache: Arc<dyn CacheStore>,
    config: CacheConfig,
    supervisor: Option<Arc<VideoTaskSupervisor>>,
}

impl CacheSaveStage {
    pub fn new(cache: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            cache,
            config,
            supervisor: None,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<VideoTaskSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// The poller may have finished the operation before this entry existed,
    /// so its own cache update had nothing to patch. Settle the entry from
    /// the job store. The poller writes the job before the cache, and this
    /// runs after the entry is written, so one of the two always sees the
    /// other.
    async fn reconcile(&self, key: &str, job_id: JobId, mut snapshot: CacheSnapshot) {
        let Some(supervisor) = &self.supervisor else {
            return;
        };
        let settled = match supervisor.settlement(job_id) {
            Ok(settled) => settled,
            Err(e) => {
                tracing::warn!(cache_key = %key, "Could not read video outcome: {e}");
                return;
            }
        };
        let result = match settled {
            VideoSettlement::Pending => return,
            VideoSettlement::Completed(video) => {
                tracing::debug!(cache_key = %key, %job_id, "Video finished before caching");
                snapshot.complete_video(&video);
                match snapshot.to_value() {
                    Ok(value) => self.cache.set(key, value, self.config.ttl_secs()).await,
                    Err(e) => Err(e),
                }
            }
            VideoSettlement::Failed => {
                tracing::info!(cache_key = %key, %job_id, "Video failed before caching; tombstoning");
                self.cache.invalidate(key).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(cache_key = %key, "Failed to settle cache entry: {e}");
        }
    }
}

#[async_trait]
impl Middleware for CacheSaveStage {
    fn stage(&self) -> StageId {
        StageId::CacheSave
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        if !self.config.enabled {
            return Ok(());
        }
        let Some(key) = ctx.metadata.cache_key.clone() else {
            return Ok(());
        };

        if ctx.is_failed() || ctx.first_error().is_some() {
            tracing::info!(cache_key = %key, "Run has errors; tombstoning cache entry");
            if let Err(e) = self.cache.invalidate(&key).await {
                tracing::warn!(cache_key = %key, "Failed to tombstone cache entry: {e}");
            }
            return Ok(());
        }
        if ctx.metadata.cache_hit {
            return Ok(());
        }
        if ctx.image.image_url.is_none() || ctx.image.image_path.is_none() {
            tracing::debug!(cache_key = %key, "No image to cache");
            return Ok(());
        }

        let snapshot = CacheSnapshot::capture(ctx);
        let written = match snapshot.to_value() {
            Ok(value) => self.cache.set(&key, value, self.config.ttl_secs()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(cache_key = %key, "Failed to cache result: {e}");
            return Ok(());
        }
        tracing::info!(cache_key = %key, "Cached generation result");

        if let (Some(job_id), Some(VideoStatus::Processing)) = (ctx.job_id, ctx.video.video_status) {
            self.reconcile(&key, job_id, snapshot).await;
        }
        Ok(())
    }

    fn weight(&self) -> f32 {
        0.2
    }
}
