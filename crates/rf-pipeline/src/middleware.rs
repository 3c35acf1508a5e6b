//! The [`Middleware`] trait defines a single pipeline stage.
//!
//! A stage reads earlier outputs from the [`GenerationContext`], writes its
//! own, and reports expected failures as a [`StageError`] instead of
//! panicking. Stages may undo side effects in [`Middleware::rollback`] when a
//! later stage fails.

use std::fmt;

use async_trait::async_trait;
use rf_core::{Error, StageId};

use crate::context::GenerationContext;

/// Category of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageErrorKind {
    /// A required input was missing or malformed; no remote call was made.
    Precondition,
    /// The wallet is not allowed to act on the requested resource.
    Denied,
    /// An external service rejected the request or could not be reached.
    Upstream,
    /// Anything else, including panics caught by the pipeline.
    Internal,
}

/// A fatal stage failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageError {
    pub stage: StageId,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn precondition(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Precondition,
            message: message.into(),
        }
    }

    pub fn denied(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Denied,
            message: message.into(),
        }
    }

    pub fn upstream(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Upstream,
            message: message.into(),
        }
    }

    pub fn internal(stage: StageId, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Internal,
            message: message.into(),
        }
    }

    /// Classify a library error raised while `stage` was running.
    pub fn from_error(stage: StageId, err: Error) -> Self {
        match err {
            Error::Upstream { message, .. } => Self::upstream(stage, message),
            Error::Forbidden(msg) | Error::Unauthorized(msg) => Self::denied(stage, msg),
            Error::Validation(msg) => Self::precondition(stage, msg),
            e @ Error::NotFound { .. } => Self::precondition(stage, e.to_string()),
            other => Self::internal(stage, other.to_string()),
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage.error_key(), self.message)
    }
}

impl std::error::Error for StageError {}

impl From<StageError> for Error {
    fn from(e: StageError) -> Self {
        Error::stage(e.stage.name(), e.message)
    }
}

/// A single step in a generation pipeline.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn stage(&self) -> StageId;

    /// Catalog name of this stage (e.g. `"nftExtraction"`).
    fn name(&self) -> &'static str {
        self.stage().name()
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError>;

    /// Undo any side effects of a previously successful
    /// [`execute`](Middleware::execute).
    ///
    /// Called in reverse order when a later stage fails. The default
    /// implementation is a no-op.
    async fn rollback(&self, _ctx: &mut GenerationContext) -> rf_core::Result<()> {
        Ok(())
    }

    /// Relative weight of this stage for progress reporting.
    fn weight(&self) -> f32 {
        1.0
    }
}
