//! Generation cache operations.
//!
//! Entries carry an absolute expiry in unix milliseconds. Reads filter on
//! expiry so a stale row behaves exactly like a missing one; the periodic
//! purge only reclaims space.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rf_core::{Error, Result};

use crate::models::{encode_ts, CacheEntry};

const COLS: &str = "key, value, expires_at, created_at";

/// Return the live value stored under `key`, if any.
pub fn get_entry(
    conn: &Connection,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Option<serde_json::Value>> {
    let q = format!("SELECT {COLS} FROM cache_entries WHERE key = ?1");
    let result = conn.query_row(&q, [key], CacheEntry::from_row);
    match result {
        Ok(entry) if entry.is_live(now) => Ok(Some(entry.value)),
        Ok(_) => Ok(None),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Insert or replace the value stored under `key`.
///
/// A non-positive `ttl_secs` writes an already-expired row.
pub fn set_entry(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
    ttl_secs: i64,
) -> Result<()> {
    let now = Utc::now();
    let expires_at = now.timestamp_millis() + ttl_secs.max(0).saturating_mul(1000);
    let value = serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("cache value is not serializable: {e}")))?;

    conn.execute(
        "INSERT INTO cache_entries (key, value, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key)
         DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at,
                       created_at = excluded.created_at",
        rusqlite::params![key, value, expires_at, encode_ts(now)],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Expire the entry under `key` immediately. Returns false if there was none.
pub fn tombstone(conn: &Connection, key: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE cache_entries SET expires_at = ?1 WHERE key = ?2",
            rusqlite::params![Utc::now().timestamp_millis(), key],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Delete every entry that expired at or before `now`.
pub fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    conn.execute(
        "DELETE FROM cache_entries WHERE expires_at <= ?1",
        [now.timestamp_millis()],
    )
    .map_err(|e| Error::database(e.to_string()))
}
