//! Object-storage path scheme.
//!
//! Every job writes to fresh per-job paths under its owner's prefix, so the
//! store never sees an in-place overwrite from this subsystem.

use rf_core::JobId;

/// `users/<wallet>/images/<jobId>_preview.<ext>`
pub fn image_path(wallet: &str, job_id: JobId, ext: &str) -> String {
    format!("users/{wallet}/images/{job_id}_preview.{ext}")
}

/// `users/<wallet>/videos/<jobId>.mp4`
pub fn video_path(wallet: &str, job_id: JobId) -> String {
    format!("users/{wallet}/videos/{job_id}.mp4")
}

/// MIME type for a stored object, derived from its extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or_default();
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
