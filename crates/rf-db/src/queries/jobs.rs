//! Generation job store operations.
//!
//! Status transitions are enforced in the `WHERE` clauses: a job only moves
//! `queued -> processing -> {completed | failed}`, and nothing leaves a
//! terminal state through these functions.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rf_core::{Error, JobId, JobStatus, MediaKind, Result};

use crate::models::{encode_ts, parse_job_id, GenerationJob, MediaSlot};

const COLS: &str = "id, nft_id, created_by, status, pipeline_type, options,
    image_path, image_url, image_url_expiry,
    thumbnail_path, thumbnail_url, thumbnail_url_expiry,
    video_path, video_url, video_url_expiry,
    video_operation, enhanced_prompt, cache_key, error, created_at, updated_at";

/// Fields supplied by the caller when a job is created.
#[derive(Debug, Clone)]
pub struct NewJob<'a> {
    pub nft_id: &'a str,
    pub created_by: &'a str,
    pub pipeline_type: &'a str,
    pub options: &'a serde_json::Value,
}

/// Everything the synchronous pipeline run produced for a job.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub image: MediaSlot,
    pub thumbnail: MediaSlot,
    pub video: MediaSlot,
    pub video_operation: Option<String>,
    pub enhanced_prompt: Option<String>,
    pub cache_key: Option<String>,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::database(e.to_string())
}

fn opt_ts(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(encode_ts)
}

/// Create a new job in the `queued` state.
pub fn create_job(conn: &Connection, new: &NewJob<'_>) -> Result<GenerationJob> {
    let id = JobId::new();
    let now = encode_ts(Utc::now());
    let options = serde_json::to_string(new.options)
        .map_err(|e| Error::Validation(format!("options are not serializable: {e}")))?;

    conn.execute(
        "INSERT INTO generation_jobs (id, nft_id, created_by, status, pipeline_type, options, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'queued', ?4, ?5, ?6, ?6)",
        params![id.to_string(), new.nft_id, new.created_by, new.pipeline_type, options, now],
    )
    .map_err(db_err)?;

    get_job(conn, id)?.ok_or_else(|| Error::Internal(format!("job {id} vanished after insert")))
}

/// Get a job by ID.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Option<GenerationJob>> {
    let q = format!("SELECT {COLS} FROM generation_jobs WHERE id = ?1");
    conn.query_row(&q, [id.to_string()], GenerationJob::from_row)
        .optional()
        .map_err(db_err)
}

/// Get a job by ID, failing with [`Error::NotFound`] when it is missing.
pub fn require_job(conn: &Connection, id: JobId) -> Result<GenerationJob> {
    get_job(conn, id)?.ok_or_else(|| Error::not_found("job", id))
}

/// List the jobs created by a wallet, newest first.
pub fn list_jobs_by_owner(
    conn: &Connection,
    wallet: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<GenerationJob>> {
    let q = format!(
        "SELECT {COLS} FROM generation_jobs WHERE created_by = ?1
         ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&q).map_err(db_err)?;
    let rows = stmt
        .query_map(params![wallet, limit, offset], GenerationJob::from_row)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Move a queued job to `processing`. Returns false if it was not queued.
pub fn mark_processing(conn: &Connection, id: JobId) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE generation_jobs SET status = 'processing', updated_at = ?1
             WHERE id = ?2 AND status = 'queued'",
            params![encode_ts(Utc::now()), id.to_string()],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Persist the outputs of a successful synchronous pipeline run and move the
/// job to `status` (`processing` or `completed`).
///
/// The video poller may already have completed the job; its video columns
/// and `completed` status are kept.
pub fn record_pipeline_output(
    conn: &Connection,
    id: JobId,
    output: &PipelineOutput,
    status: JobStatus,
) -> Result<bool> {
    if !matches!(status, JobStatus::Processing | JobStatus::Completed) {
        return Err(Error::Validation(format!(
            "pipeline output cannot move a job to '{status}'"
        )));
    }

    let n = conn
        .execute(
            "UPDATE generation_jobs SET
                image_path = ?1, image_url = ?2, image_url_expiry = ?3,
                thumbnail_path = ?4, thumbnail_url = ?5, thumbnail_url_expiry = ?6,
                video_path = COALESCE(video_path, ?7),
                video_url = COALESCE(video_url, ?8),
                video_url_expiry = COALESCE(video_url_expiry, ?9),
                video_operation = ?10, enhanced_prompt = ?11, cache_key = ?12,
                status = CASE WHEN status = 'completed' THEN 'completed' ELSE ?13 END,
                error = NULL, updated_at = ?14
             WHERE id = ?15 AND status IN ('processing', 'completed')",
            params![
                output.image.path,
                output.image.url,
                opt_ts(output.image.url_expiry),
                output.thumbnail.path,
                output.thumbnail.url,
                opt_ts(output.thumbnail.url_expiry),
                output.video.path,
                output.video.url,
                opt_ts(output.video.url_expiry),
                output.video_operation,
                output.enhanced_prompt,
                output.cache_key,
                status.as_str(),
                encode_ts(Utc::now()),
                id.to_string(),
            ],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Attach a video operation handle to a processing job.
pub fn set_video_operation(conn: &Connection, id: JobId, operation: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE generation_jobs SET video_operation = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![operation, encode_ts(Utc::now()), id.to_string()],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Mark a job completed with its final video artifact.
pub fn complete_job(conn: &Connection, id: JobId, video: &MediaSlot) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE generation_jobs SET status = 'completed', error = NULL,
                video_path = ?1, video_url = ?2, video_url_expiry = ?3, updated_at = ?4
             WHERE id = ?5 AND status = 'processing'",
            params![
                video.path,
                video.url,
                opt_ts(video.url_expiry),
                encode_ts(Utc::now()),
                id.to_string()
            ],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Mark a job failed. Terminal jobs are left untouched.
pub fn fail_job(conn: &Connection, id: JobId, error: &str) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE generation_jobs SET status = 'failed', error = ?1, updated_at = ?2
             WHERE id = ?3 AND status IN ('queued', 'processing')",
            params![error, encode_ts(Utc::now()), id.to_string()],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Fail every job whose synchronous run was cut short by a restart: jobs
/// still `queued`, and `processing` jobs with no video operation to resume.
/// Returns the ids of the jobs that were failed.
pub fn fail_orphaned(conn: &Connection, error: &str) -> Result<Vec<JobId>> {
    let mut stmt = conn
        .prepare(
            "UPDATE generation_jobs SET status = 'failed', error = ?1, updated_at = ?2
             WHERE status = 'queued'
                OR (status = 'processing' AND video_operation IS NULL)
             RETURNING id",
        )
        .map_err(db_err)?;
    let ids = stmt
        .query_map(params![error, encode_ts(Utc::now())], |row| parse_job_id(row, 0))
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(ids)
}

/// Replace the signed URL of one media slot.
pub fn set_media_url(
    conn: &Connection,
    id: JobId,
    kind: MediaKind,
    url: &str,
    expiry: DateTime<Utc>,
) -> Result<bool> {
    let prefix = kind.column_prefix();
    let q = format!(
        "UPDATE generation_jobs SET {prefix}_url = ?1, {prefix}_url_expiry = ?2, updated_at = ?3
         WHERE id = ?4 AND {prefix}_path IS NOT NULL"
    );
    let n = conn
        .execute(
            &q,
            params![url, encode_ts(expiry), encode_ts(Utc::now()), id.to_string()],
        )
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Jobs whose remote video operation is still being awaited.
pub fn list_pending_video_jobs(conn: &Connection) -> Result<Vec<GenerationJob>> {
    let q = format!(
        "SELECT {COLS} FROM generation_jobs
         WHERE status = 'processing' AND video_operation IS NOT NULL AND video_path IS NULL
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(db_err)?;
    let rows = stmt
        .query_map([], GenerationJob::from_row)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Jobs holding at least one stored artifact whose URL is missing or
/// expires before `before`.
pub fn list_jobs_with_expiring_urls(
    conn: &Connection,
    before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<GenerationJob>> {
    let q = format!(
        "SELECT {COLS} FROM generation_jobs
         WHERE (image_path IS NOT NULL AND (image_url_expiry IS NULL OR image_url_expiry <= ?1))
            OR (thumbnail_path IS NOT NULL AND (thumbnail_url_expiry IS NULL OR thumbnail_url_expiry <= ?1))
            OR (video_path IS NOT NULL AND (video_url_expiry IS NULL OR video_url_expiry <= ?1))
         ORDER BY updated_at ASC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&q).map_err(db_err)?;
    let rows = stmt
        .query_map(params![encode_ts(before), limit], GenerationJob::from_row)
        .map_err(db_err)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(db_err)?;
    Ok(rows)
}
