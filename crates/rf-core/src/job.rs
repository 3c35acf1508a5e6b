//! Job and stage vocabulary shared by the pipeline, the job store, and the
//! HTTP surface.
//!
//! All enums serialize in the same spelling they are stored with and
//! implement `Display` / `FromStr` manually for consistent string
//! representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a persisted generation job.
///
/// `Queued -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the linear state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Processing)
                | (Self::Queued, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Validation(format!("unknown job status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// VideoStatus
// ---------------------------------------------------------------------------

/// Status of the remote video-generation operation as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// The three media slots carried by a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Thumbnail,
    Video,
}

impl MediaKind {
    /// All slots, in the order they are written for a job.
    pub const ALL: [MediaKind; 3] = [MediaKind::Image, MediaKind::Thumbnail, MediaKind::Video];

    /// Column-name prefix used by the job store (`image_path`, `video_url`, ...).
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Thumbnail => "thumbnail",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_prefix())
    }
}

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

/// Identifier for every pipeline stage, plus [`StageId::Global`] for
/// failures that belong to the run rather than a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageId {
    #[serde(rename = "global")]
    Global,
    #[serde(rename = "logging")]
    Logging,
    #[serde(rename = "errorHandling")]
    ErrorHandling,
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "caching")]
    Caching,
    #[serde(rename = "nftExtraction")]
    NftExtraction,
    #[serde(rename = "prompt")]
    Prompt,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "cacheSave")]
    CacheSave,
}

impl StageId {
    /// Stages whose errors are consulted first, in order, when the pipeline
    /// decides which message to surface.
    pub const ERROR_PRIORITY: [StageId; 5] = [
        StageId::Global,
        StageId::Image,
        StageId::Video,
        StageId::Prompt,
        StageId::NftExtraction,
    ];

    /// Catalog name used in pipeline configurations.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Logging => "logging",
            Self::ErrorHandling => "errorHandling",
            Self::Auth => "auth",
            Self::Caching => "caching",
            Self::NftExtraction => "nftExtraction",
            Self::Prompt => "prompt",
            Self::Image => "image",
            Self::Video => "video",
            Self::CacheSave => "cacheSave",
        }
    }

    /// Diagnostic key under which this stage's error is reported.
    pub fn error_key(&self) -> &'static str {
        match self {
            Self::Global => "globalError",
            Self::Logging => "loggingError",
            Self::ErrorHandling => "errorHandlingError",
            Self::Auth => "authError",
            Self::Caching => "cachingError",
            Self::NftExtraction => "nftExtractionError",
            Self::Prompt => "promptEnhancementError",
            Self::Image => "imageGenerationError",
            Self::Video => "videoGenerationError",
            Self::CacheSave => "cacheSaveError",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logging" => Ok(Self::Logging),
            "errorHandling" => Ok(Self::ErrorHandling),
            "auth" => Ok(Self::Auth),
            "caching" => Ok(Self::Caching),
            "nftExtraction" => Ok(Self::NftExtraction),
            "prompt" => Ok(Self::Prompt),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "cacheSave" => Ok(Self::CacheSave),
            other => Err(Error::Validation(format!("unknown stage '{other}'"))),
        }
    }
}
