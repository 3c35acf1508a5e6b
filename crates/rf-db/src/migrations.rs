//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use rf_core::{Error, Result};

/// V1: the persisted generation job record.
const V1_GENERATION_JOBS: &str = r#"
CREATE TABLE generation_jobs (
    id                   TEXT PRIMARY KEY,
    nft_id               TEXT NOT NULL,
    created_by           TEXT NOT NULL,
    status               TEXT NOT NULL DEFAULT 'queued'
                         CHECK (status IN ('queued', 'processing', 'completed', 'failed')),
    pipeline_type        TEXT NOT NULL,
    options              TEXT NOT NULL DEFAULT '{}',
    image_path           TEXT,
    image_url            TEXT,
    image_url_expiry     TEXT,
    thumbnail_path       TEXT,
    thumbnail_url        TEXT,
    thumbnail_url_expiry TEXT,
    video_path           TEXT,
    video_url            TEXT,
    video_url_expiry     TEXT,
    video_operation      TEXT,
    enhanced_prompt      TEXT,
    cache_key            TEXT,
    error                TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX idx_generation_jobs_owner ON generation_jobs(created_by, created_at);
CREATE INDEX idx_generation_jobs_status ON generation_jobs(status);
"#;

/// V2: TTL-bounded generation result cache.
const V2_CACHE_ENTRIES: &str = r#"
CREATE TABLE cache_entries (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_cache_entries_expiry ON cache_entries(expires_at);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, V1_GENERATION_JOBS), (2, V2_CACHE_ENTRIES)];

/// Apply every migration that has not been recorded yet.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;
        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }

    #[test]
    fn status_check_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO generation_jobs (id, nft_id, created_by, status, pipeline_type, created_at, updated_at)
             VALUES ('j', 'n', 'w', 'exploded', 'standard', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
