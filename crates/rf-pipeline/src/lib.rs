//! # rf-pipeline
//!
//! Orchestration of NFT-to-video generation.
//!
//! This crate provides:
//!
//! - **[`Middleware`]** trait -- a single stage with execute / rollback
//!   semantics and typed [`StageError`]s.
//! - **[`GenerationContext`]** -- typed state threaded through one run.
//! - **[`Pipeline`]** -- runs stages sequentially, short-circuits on the
//!   first failure, rolls back completed stages, and reports progress.
//! - **[`PipelineFactory`]** -- builds the named configurations from the
//!   stage catalog ([`stages`]) with injected service clients.
//! - **[`CacheStore`]** -- result cache keyed by a request [`fingerprint`].
//! - **[`VideoTaskSupervisor`]** -- background polling of long-running video
//!   operations with backoff and cancellation.
//! - **[`GenerationService`]** -- creates, runs, and persists jobs.

pub mod cache;
pub mod context;
pub mod factory;
pub mod fingerprint;
pub mod middleware;
pub mod pipeline;
pub mod poller;
pub mod service;
pub mod stages;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export key types at the crate root.
pub use cache::{CacheSnapshot, CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use context::{
    GenerationContext, GenerationOptions, GenerationRequest, ProgressSender, RunStatus,
};
pub use factory::{PipelineDeps, PipelineFactory, PipelineKind, PipelineSettings};
pub use middleware::{Middleware, StageError, StageErrorKind};
pub use pipeline::Pipeline;
pub use poller::{
    PollPolicy, SupervisorDeps, TaskState, VideoSettlement, VideoTask, VideoTaskSupervisor,
};
pub use service::GenerationService;
