//! Generation result cache.
//!
//! [`CacheStore`] is a get/set-with-TTL key/value store. The caching stage
//! reads [`CacheSnapshot`]s from it and the cache-save stage writes them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rf_core::{Error, Result, VideoStatus};
use rf_db::models::MediaSlot;
use rf_db::pool::{get_conn, DbPool};
use rf_db::queries::cache as cache_queries;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::GenerationContext;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` for `ttl_secs`. A non-positive TTL writes an entry that
    /// is already expired.
    async fn set(&self, key: &str, value: Value, ttl_secs: i64) -> Result<()>;

    /// Make `key` unreadable.
    async fn invalidate(&self, key: &str) -> Result<()> {
        self.set(key, Value::Null, 0).await
    }
}

/// Cache backed by the `cache_entries` table.
#[derive(Clone)]
pub struct SqliteCacheStore {
    db: DbPool,
}

impl SqliteCacheStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Delete expired rows; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = get_conn(&self.db)?;
        cache_queries::purge_expired(&conn, Utc::now())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let conn = get_conn(&self.db)?;
        cache_queries::get_entry(&conn, key, Utc::now())
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: i64) -> Result<()> {
        let conn = get_conn(&self.db)?;
        cache_queries::set_entry(&conn, key, &value, ttl_secs)
    }

    async fn invalidate(&self, key: &str) -> Result<()> {
        let conn = get_conn(&self.db)?;
        cache_queries::tombstone(&conn, key)?;
        Ok(())
    }
}

/// Process-local cache, used when no database is wired in.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, (Value, i64)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Utc::now().timestamp_millis();
        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl_secs: i64) -> Result<()> {
        let expires = Utc::now().timestamp_millis() + ttl_secs.max(0).saturating_mul(1000);
        self.entries.insert(key.to_string(), (value, expires));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub cached_at: DateTime<Utc>,
    pub video_status: Option<VideoStatus>,
}

/// The subset of a finished run needed to reconstruct it on a cache hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub thumbnail_path: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_path: Option<String>,
    pub video_url: Option<String>,
    pub video_operation_name: Option<String>,
    pub enhanced_prompt: Option<String>,
    pub metadata: SnapshotMeta,
}

impl CacheSnapshot {
    pub fn capture(ctx: &GenerationContext) -> Self {
        Self {
            image_path: ctx.image.image_path.clone(),
            image_url: ctx.image.image_url.clone(),
            thumbnail_path: ctx.image.thumbnail_path.clone(),
            thumbnail_url: ctx.image.thumbnail_url.clone(),
            video_path: ctx.video.video_path.clone(),
            video_url: ctx.video.video_url.clone(),
            video_operation_name: ctx.video.video_operation_name.clone(),
            enhanced_prompt: ctx.prompt.enhanced_prompt.clone(),
            metadata: SnapshotMeta {
                cached_at: Utc::now(),
                video_status: ctx.video.video_status,
            },
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Internal(format!("malformed cache entry: {e}")))
    }

    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::Internal(format!("cache entry is not serializable: {e}")))
    }

    /// Record the finished video of the cached operation.
    pub fn complete_video(&mut self, video: &MediaSlot) {
        self.video_path = video.path.clone();
        self.video_url = video.url.clone();
        self.metadata.video_status = Some(VideoStatus::Completed);
    }

    /// Copy every cached field (but not the metadata block) into `ctx`.
    pub fn apply(&self, ctx: &mut GenerationContext) {
        ctx.image.image_path = self.image_path.clone();
        ctx.image.image_url = self.image_url.clone();
        ctx.image.thumbnail_path = self.thumbnail_path.clone();
        ctx.image.thumbnail_url = self.thumbnail_url.clone();
        ctx.video.video_path = self.video_path.clone();
        ctx.video.video_url = self.video_url.clone();
        ctx.video.video_operation_name = self.video_operation_name.clone();
        if self.enhanced_prompt.is_some() {
            ctx.prompt.enhanced_prompt = self.enhanced_prompt.clone();
        }

        ctx.video.video_status = if ctx.video.video_path.is_some() {
            Some(VideoStatus::Completed)
        } else if ctx.video.video_operation_name.is_some() {
            Some(VideoStatus::Processing)
        } else {
            None
        };
    }
}
