//! State threaded through one pipeline run.
//!
//! [`GenerationContext`] carries the request inputs, every stage's typed
//! outputs, and a [`ContextMetadata`] block with diagnostics. Stages outside
//! the fixed vocabulary can still exchange values through the loose
//! [`get`](GenerationContext::get) / [`set`](GenerationContext::set) maps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rf_ai::{ImageSize, NftData};
use rf_core::{Error, JobId, PromptId, Result, StageId, VideoStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sender for reporting progress from the pipeline.
///
/// Wraps a callback that receives a progress percentage (0.0 -- 100.0) and
/// the name of the stage that just finished.
pub struct ProgressSender {
    callback: Box<dyn Fn(f32, StageId) + Send + Sync>,
}

impl ProgressSender {
    pub fn new(callback: impl Fn(f32, StageId) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A sender that discards all reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    pub fn send(&self, progress: f32, stage: StageId) {
        (self.callback)(progress, stage);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Caller-supplied tuning knobs, parsed from the job's `options` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationOptions {
    pub style: Option<String>,
    pub size: Option<String>,
    /// Explicit reference image; defaults to the NFT's own image.
    pub reference_image_url: Option<String>,
    pub use_reference_image: bool,
    pub lore: Option<String>,
    pub additional_context: Option<String>,
    /// Seed image for pipelines that start at the video stage.
    pub image_url: Option<String>,
    pub resolution: Option<String>,
    pub aspect_ratio: Option<String>,
    pub duration_secs: Option<u32>,
    pub fps: Option<u32>,
    pub skip_cache: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            style: None,
            size: None,
            reference_image_url: None,
            use_reference_image: true,
            lore: None,
            additional_context: None,
            image_url: None,
            resolution: None,
            aspect_ratio: None,
            duration_secs: None,
            fps: None,
            skip_cache: false,
        }
    }
}

impl GenerationOptions {
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Validation(format!("invalid options: {e}")))
    }
}

/// The public entry-point payload for one generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub nft_id: String,
    pub user_prompt: String,
    pub wallet_address: String,
    #[serde(default)]
    pub options: Value,
}

// ---------------------------------------------------------------------------
// Stage outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOutput {
    pub enhanced_prompt: Option<String>,
    pub original_prompt: Option<String>,
    pub prompt_id: Option<PromptId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOutput {
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub image_url_expiry: Option<DateTime<Utc>>,
    pub thumbnail_path: Option<String>,
    pub thumbnail_url: Option<String>,
    pub thumbnail_url_expiry: Option<DateTime<Utc>>,
    /// Size actually requested from the service.
    pub size: Option<ImageSize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOutput {
    pub video_status: Option<VideoStatus>,
    pub video_operation_name: Option<String>,
    pub video_path: Option<String>,
    pub video_url: Option<String>,
    pub video_url_expiry: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetadata {
    pub authenticated: bool,
    pub cache_hit: bool,
    pub cache_key: Option<String>,
    pub has_errors: bool,
    pub errors: BTreeMap<StageId, StageErrorRecord>,
    /// Non-fatal degradations (e.g. prompt enhancement fell back).
    pub warnings: BTreeMap<StageId, StageErrorRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Succeeded,
    Error,
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationContext {
    pub job_id: Option<JobId>,
    pub nft_id: Option<String>,
    pub wallet_address: Option<String>,
    pub user_prompt: Option<String>,
    pub options: GenerationOptions,

    pub nft: Option<NftData>,
    pub nft_image_url: Option<String>,
    pub prompt: PromptOutput,
    pub image: ImageOutput,
    pub video: VideoOutput,

    pub metadata: ContextMetadata,
    pub error: Option<String>,
    pub status: RunStatus,

    attributes: BTreeMap<String, Value>,
}

impl GenerationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial context for a request.
    pub fn from_request(job_id: Option<JobId>, req: &GenerationRequest) -> Result<Self> {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
        Ok(Self {
            job_id,
            nft_id: non_empty(&req.nft_id),
            wallet_address: non_empty(&req.wallet_address),
            user_prompt: non_empty(&req.user_prompt),
            options: GenerationOptions::from_value(&req.options)?,
            ..Self::default()
        })
    }

    // -- loose key/value access ----------------------------------------------

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.extra.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.extra.insert(key.into(), value);
    }

    // -- derived inputs ------------------------------------------------------

    /// The best prompt available: enhanced if present, otherwise the user's.
    pub fn effective_prompt(&self) -> Option<&str> {
        let usable = |p: &&str| !p.trim().is_empty();
        self.prompt
            .enhanced_prompt
            .as_deref()
            .filter(usable)
            .or_else(|| self.user_prompt.as_deref().filter(usable))
    }

    /// Reference image for the image stage, if one should be used.
    pub fn reference_image_url(&self) -> Option<&str> {
        if !self.options.use_reference_image {
            return None;
        }
        self.options
            .reference_image_url
            .as_deref()
            .or(self.nft_image_url.as_deref())
    }

    // -- errors --------------------------------------------------------------

    /// Record a fatal error for `stage` without changing the run status.
    pub fn record_error(&mut self, stage: StageId, message: impl Into<String>) {
        self.metadata.errors.insert(
            stage,
            StageErrorRecord {
                message: message.into(),
                at: Utc::now(),
            },
        );
        self.metadata.has_errors = true;
    }

    /// Record a degradation that must not halt the run.
    pub fn record_warning(&mut self, stage: StageId, message: impl Into<String>) {
        self.metadata.warnings.insert(
            stage,
            StageErrorRecord {
                message: message.into(),
                at: Utc::now(),
            },
        );
    }

    /// Record a fatal error and mark the run failed.
    pub fn fail(&mut self, stage: StageId, message: impl Into<String>) {
        let message = message.into();
        self.record_error(stage, message.clone());
        if self.error.is_none() {
            self.error = Some(message);
        }
        self.status = RunStatus::Error;
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Error
    }

    /// The message the run should fail with, if any.
    ///
    /// Checks the top-level error, then stage errors in
    /// [`StageId::ERROR_PRIORITY`] order, then any other stage error, then the
    /// bare `has_errors` flag.
    pub fn first_error(&self) -> Option<String> {
        if let Some(e) = self.error.as_deref().filter(|e| !e.is_empty()) {
            return Some(e.to_string());
        }

        let errors = &self.metadata.errors;
        let prioritized = StageId::ERROR_PRIORITY
            .iter()
            .filter_map(|stage| errors.get(stage));
        let rest = errors
            .iter()
            .filter(|(stage, _)| !StageId::ERROR_PRIORITY.contains(stage))
            .map(|(_, record)| record);

        if let Some(record) = prioritized.chain(rest).find(|r| !r.message.is_empty()) {
            return Some(record.message.clone());
        }

        self.metadata
            .has_errors
            .then(|| "Pipeline stage reported an error".to_string())
    }

    /// Drop every output owned by `stage`.
    pub fn clear_outputs(&mut self, stage: StageId) {
        match stage {
            StageId::Auth => self.metadata.authenticated = false,
            StageId::NftExtraction => {
                self.nft = None;
                self.nft_image_url = None;
            }
            StageId::Prompt => self.prompt = PromptOutput::default(),
            StageId::Image => self.image = ImageOutput::default(),
            StageId::Video => self.video = VideoOutput::default(),
            StageId::Caching => self.metadata.cache_hit = false,
            StageId::Global
            | StageId::Logging
            | StageId::ErrorHandling
            | StageId::CacheSave => {}
        }
    }

    /// Whether this run restored `stage`'s outputs from the cache.
    pub fn restored_from_cache(&self, stage: StageId) -> bool {
        if !self.metadata.cache_hit {
            return false;
        }
        match stage {
            StageId::Prompt => self.prompt.enhanced_prompt.is_some(),
            StageId::Image => self.image.image_path.is_some() && self.image.image_url.is_some(),
            StageId::Video => self.video.video_operation_name.is_some() || self.video.video_path.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> GenerationRequest {
        GenerationRequest {
            nft_id: "nft-1".into(),
            user_prompt: "infiltrate the tower".into(),
            wallet_address: "Wallet1".into(),
            options: json!({"style": "noir", "size": "1792x1024"}),
        }
    }

    #[test]
    fn unset_keys_read_as_none() {
        let mut ctx = GenerationContext::new();
        assert!(ctx.get("anything").is_none());
        assert!(ctx.get_metadata("anything").is_none());

        ctx.set("custom", json!(3));
        ctx.set_metadata("trace", json!("abc"));
        assert_eq!(ctx.get("custom"), Some(&json!(3)));
        assert_eq!(ctx.get_metadata("trace"), Some(&json!("abc")));
    }

    #[test]
    fn from_request_parses_options() {
        let ctx = GenerationContext::from_request(None, &request()).unwrap();
        assert_eq!(ctx.nft_id.as_deref(), Some("nft-1"));
        assert_eq!(ctx.options.style.as_deref(), Some("noir"));
        assert!(ctx.options.use_reference_image);
        assert_eq!(ctx.status, RunStatus::Pending);
    }

    #[test]
    fn blank_inputs_become_none() {
        let mut req = request();
        req.user_prompt = "   ".into();
        let ctx = GenerationContext::from_request(None, &req).unwrap();
        assert!(ctx.user_prompt.is_none());
    }

    #[test]
    fn blank_enhanced_prompt_falls_back_to_user_prompt() {
        let mut ctx = GenerationContext::from_request(None, &request()).unwrap();
        ctx.prompt.enhanced_prompt = Some(" \n ".into());
        assert_eq!(ctx.effective_prompt(), Some("infiltrate the tower"));

        ctx.prompt.enhanced_prompt = Some("a neon tower".into());
        assert_eq!(ctx.effective_prompt(), Some("a neon tower"));

        ctx.prompt.enhanced_prompt = None;
        ctx.user_prompt = None;
        assert!(ctx.effective_prompt().is_none());
    }

    #[test]
    fn malformed_options_rejected() {
        let mut req = request();
        req.options = json!({"fps": "fast"});
        assert!(GenerationContext::from_request(None, &req).is_err());
    }

    #[test]
    fn first_error_priority() {
        let mut ctx = GenerationContext::new();
        assert!(ctx.first_error().is_none());

        ctx.record_error(StageId::NftExtraction, "nft missing");
        ctx.record_error(StageId::Auth, "bad wallet");
        assert_eq!(ctx.first_error().as_deref(), Some("nft missing"));

        ctx.record_error(StageId::Video, "video failed");
        assert_eq!(ctx.first_error().as_deref(), Some("video failed"));

        ctx.record_error(StageId::Image, "image failed");
        assert_eq!(ctx.first_error().as_deref(), Some("image failed"));

        ctx.error = Some("top".into());
        assert_eq!(ctx.first_error().as_deref(), Some("top"));
    }

    #[test]
    fn non_priority_stage_error_still_detected() {
        let mut ctx = GenerationContext::new();
        ctx.record_error(StageId::Auth, "bad wallet");
        assert_eq!(ctx.first_error().as_deref(), Some("bad wallet"));
    }

    #[test]
    fn bare_flag_detected() {
        let mut ctx = GenerationContext::new();
        ctx.metadata.has_errors = true;
        assert_eq!(
            ctx.first_error().as_deref(),
            Some("Pipeline stage reported an error")
        );
    }

    #[test]
    fn warnings_do_not_count_as_errors() {
        let mut ctx = GenerationContext::new();
        ctx.record_warning(StageId::Prompt, "fell back to raw prompt");
        assert!(ctx.first_error().is_none());
    }

    #[test]
    fn fail_keeps_first_message() {
        let mut ctx = GenerationContext::new();
        ctx.fail(StageId::Image, "first");
        ctx.fail(StageId::Video, "second");
        assert_eq!(ctx.error.as_deref(), Some("first"));
        assert!(ctx.is_failed());
    }

    #[test]
    fn clearing_image_outputs() {
        let mut ctx = GenerationContext::new();
        ctx.image.image_path = Some("p".into());
        ctx.image.image_url = Some("u".into());
        ctx.image.thumbnail_path = Some("p".into());
        ctx.clear_outputs(StageId::Image);
        assert_eq!(ctx.image, ImageOutput::default());
    }

    #[test]
    fn reference_image_resolution() {
        let mut ctx = GenerationContext::new();
        ctx.nft_image_url = Some("https://nft/1.png".into());
        assert_eq!(ctx.reference_image_url(), Some("https://nft/1.png"));

        ctx.options.reference_image_url = Some("https://other.png".into());
        assert_eq!(ctx.reference_image_url(), Some("https://other.png"));

        ctx.options.use_reference_image = false;
        assert_eq!(ctx.reference_image_url(), None);
    }
}
