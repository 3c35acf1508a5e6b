//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use chrono::{DateTime, SecondsFormat, Utc};
use rf_core::{JobId, JobStatus, MediaKind};
use serde::Serialize;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Canonical timestamp encoding. Fixed-width so stored values order
/// lexicographically.
pub fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|v| {
        DateTime::parse_from_rfc3339(&v)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_err(idx, e))
    })
    .transpose()
}

pub(crate) fn parse_job_id(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<JobId> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s)
        .map(JobId::from)
        .map_err(|e| conversion_err(idx, e))
}

// ---------------------------------------------------------------------------
// MediaSlot
// ---------------------------------------------------------------------------

/// Durable path plus the current signed URL for one media artifact.
///
/// A path without a URL (or with an expired one) is normal: the URL manager
/// re-mints URLs from the path on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSlot {
    pub path: Option<String>,
    pub url: Option<String>,
    pub url_expiry: Option<DateTime<Utc>>,
}

impl MediaSlot {
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.url.is_none()
    }

    fn from_row(row: &rusqlite::Row, first: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(first)?,
            url: row.get(first + 1)?,
            url_expiry: parse_opt_ts(row, first + 2)?,
        })
    }
}

// ---------------------------------------------------------------------------
// GenerationJob
// ---------------------------------------------------------------------------

/// Persisted record of one generation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: JobId,
    pub nft_id: String,
    pub created_by: String,
    pub status: JobStatus,
    pub pipeline_type: String,
    pub options: serde_json::Value,
    pub image: MediaSlot,
    pub thumbnail: MediaSlot,
    pub video: MediaSlot,
    pub video_operation: Option<String>,
    pub enhanced_prompt: Option<String>,
    pub cache_key: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let status: String = row.get(3)?;
        let options: String = row.get(5)?;
        Ok(Self {
            id: parse_job_id(row, 0)?,
            nft_id: row.get(1)?,
            created_by: row.get(2)?,
            status: status.parse().map_err(|e| conversion_err(3, e))?,
            pipeline_type: row.get(4)?,
            options: serde_json::from_str(&options).map_err(|e| conversion_err(5, e))?,
            image: MediaSlot::from_row(row, 6)?,
            thumbnail: MediaSlot::from_row(row, 9)?,
            video: MediaSlot::from_row(row, 12)?,
            video_operation: row.get(15)?,
            enhanced_prompt: row.get(16)?,
            cache_key: row.get(17)?,
            error: row.get(18)?,
            created_at: parse_ts(row, 19)?,
            updated_at: parse_ts(row, 20)?,
        })
    }

    pub fn slot(&self, kind: MediaKind) -> &MediaSlot {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Thumbnail => &self.thumbnail,
            MediaKind::Video => &self.video,
        }
    }

    pub fn slot_mut(&mut self, kind: MediaKind) -> &mut MediaSlot {
        match kind {
            MediaKind::Image => &mut self.image,
            MediaKind::Thumbnail => &mut self.thumbnail,
            MediaKind::Video => &mut self.video,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    /// Unix milliseconds.
    pub expires_at: i64,
    pub created_at: String,
}

impl CacheEntry {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let value: String = row.get(1)?;
        Ok(Self {
            key: row.get(0)?,
            value: serde_json::from_str(&value).map_err(|e| conversion_err(1, e))?,
            expires_at: row.get(2)?,
            created_at: row.get(3)?,
        })
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn encoded_timestamps_sort_lexicographically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(encode_ts(a) < encode_ts(b));
        assert_eq!(encode_ts(a), "2026-01-01T09:00:00.000Z");
    }

    #[test]
    fn media_slot_emptiness() {
        assert!(MediaSlot::default().is_empty());
        let slot = MediaSlot {
            path: Some("users/w/images/j_preview.png".into()),
            ..Default::default()
        };
        assert!(!slot.is_empty());
    }
}
