//! Background supervision of long-running video operations.
//!
//! The video stage returns as soon as the remote operation is accepted.
//! [`VideoTaskSupervisor`] owns the follow-up: one tokio task per job polls
//! the operation with capped exponential backoff and writes the terminal
//! outcome straight into the job store. Each task has its own child
//! [`CancellationToken`], so a single job can be cancelled while
//! [`shutdown`](VideoTaskSupervisor::shutdown) stops all of them at once.
//!
//! A task stopped by shutdown leaves its job in `processing`; the server
//! resumes it from the job store on the next start. Finished tasks drop out
//! of the supervisor, and lookups for them are answered from the job store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use rf_ai::{OperationState, VideoGenerator};
use rf_core::config::VideoConfig;
use rf_core::events::{EventBus, EventPayload};
use rf_core::{JobId, JobStatus, Result};
use rf_db::models::MediaSlot;
use rf_db::pool::{get_conn, DbPool};
use rf_db::queries::jobs;
use rf_media::{paths, ObjectStore};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cache::{CacheSnapshot, CacheStore};

/// Backoff schedule for status polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn from_config(config: &VideoConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.poll_initial_delay_secs),
            max_delay: Duration::from_secs(config.poll_max_delay_secs),
            max_attempts: config.poll_max_attempts,
        }
    }

    /// Delay before poll number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_config(&VideoConfig::default())
    }
}

/// An accepted remote operation to follow up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTask {
    pub job_id: JobId,
    pub wallet: String,
    pub operation: String,
    /// Cache entry to patch on success or invalidate on failure.
    pub cache_key: Option<String>,
}

/// Observable state of a supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Polling { attempt: u32 },
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    /// Stopped by shutdown or abandoned, or the job had already left
    /// `processing`; the job was left untouched.
    Stopped,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Polling { .. })
    }
}

/// What the job store records about a job's video.
#[derive(Debug, Clone)]
pub enum VideoSettlement {
    /// Not finished, or nothing is known about the job.
    Pending,
    Completed(MediaSlot),
    Failed,
}

/// Restart error recorded on jobs whose synchronous run never finished.
pub const INTERRUPTED: &str = "Interrupted by restart";

enum PollOutcome {
    Succeeded(String),
    Failed(String),
    TimedOut,
    Cancelled,
    Stopped,
}

struct TaskEntry {
    token: CancellationToken,
    abandoned: Arc<AtomicBool>,
    state: watch::Receiver<TaskState>,
}

/// Dependencies the supervisor writes through.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub db: DbPool,
    pub store: Arc<dyn ObjectStore>,
    pub video: Arc<dyn VideoGenerator>,
    pub cache: Arc<dyn CacheStore>,
    pub events: Option<Arc<EventBus>>,
    pub signed_url_ttl: Duration,
    pub cache_ttl_secs: i64,
}

pub struct VideoTaskSupervisor {
    deps: SupervisorDeps,
    policy: PollPolicy,
    tasks: DashMap<JobId, TaskEntry>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl VideoTaskSupervisor {
    pub fn new(deps: SupervisorDeps, policy: PollPolicy) -> Self {
        Self {
            deps,
            policy,
            tasks: DashMap::new(),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Start following `task`. Returns false if the job is already being
    /// polled or the supervisor has shut down.
    pub fn spawn(self: &Arc<Self>, task: VideoTask) -> bool {
        if self.root.is_cancelled() {
            tracing::warn!(job_id = %task.job_id, "Supervisor is shut down; not polling");
            return false;
        }
        if let Some(existing) = self.tasks.get(&task.job_id) {
            if !existing.state.borrow().is_terminal() {
                return false;
            }
        }

        let token = self.root.child_token();
        let abandoned = Arc::new(AtomicBool::new(false));
        let (tx, rx) = watch::channel(TaskState::Polling { attempt: 0 });
        self.tasks.insert(
            task.job_id,
            TaskEntry {
                token: token.clone(),
                abandoned: Arc::clone(&abandoned),
                state: rx,
            },
        );

        tracing::info!(
            job_id = %task.job_id,
            operation = %task.operation,
            "Supervising video operation"
        );

        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            let final_state = this.run(&task, &token, &abandoned, &tx).await;
            let _ = tx.send(final_state);
            // A respawn for the same job may already own the slot.
            this.tasks
                .remove_if(&task.job_id, |_, entry| Arc::ptr_eq(&entry.abandoned, &abandoned));
        });
        true
    }

    /// Cancel polling for a job. The job is marked failed.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.tasks.get(&job_id) {
            Some(entry) if !entry.state.borrow().is_terminal() => {
                tracing::info!(%job_id, "Cancelling video polling");
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Stop polling without touching the job, for callers that record the
    /// outcome themselves.
    pub fn abandon(&self, job_id: JobId) -> bool {
        match self.tasks.get(&job_id) {
            Some(entry) if !entry.state.borrow().is_terminal() => {
                tracing::debug!(%job_id, "Abandoning video polling");
                entry.abandoned.store(true, Ordering::SeqCst);
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Live state of a supervised task, or the outcome recorded in the job
    /// store once the task has finished.
    pub fn state(&self, job_id: JobId) -> Option<TaskState> {
        if let Some(entry) = self.tasks.get(&job_id) {
            return Some(*entry.state.borrow());
        }
        self.recorded_state(job_id)
    }

    /// Number of tasks still tracked, finished or not.
    pub fn tracked_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn active_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|entry| !entry.state.borrow().is_terminal())
            .count()
    }

    /// Wait until the task for `job_id` reaches a terminal state.
    pub async fn wait(&self, job_id: JobId) -> Option<TaskState> {
        let live = self.tasks.get(&job_id).map(|entry| entry.state.clone());
        let Some(mut rx) = live else {
            return self.recorded_state(job_id);
        };
        let terminal = rx.wait_for(|s| s.is_terminal()).await.map(|s| *s).ok();
        Some(terminal.unwrap_or_else(|| *rx.borrow()))
    }

    fn recorded_state(&self, job_id: JobId) -> Option<TaskState> {
        let job = get_conn(&self.deps.db)
            .and_then(|conn| jobs::get_job(&conn, job_id))
            .ok()
            .flatten()?;
        Some(match job.status {
            JobStatus::Completed => TaskState::Completed,
            JobStatus::Failed => TaskState::Failed,
            JobStatus::Queued | JobStatus::Processing => TaskState::Stopped,
        })
    }

    /// The video outcome the job store holds for `job_id`. Writers that may
    /// run after the task finished use this to avoid recording stale state.
    pub fn settlement(&self, job_id: JobId) -> Result<VideoSettlement> {
        let job = {
            let conn = get_conn(&self.deps.db)?;
            jobs::get_job(&conn, job_id)?
        };
        Ok(match job {
            Some(job) if job.status == JobStatus::Completed && job.video.path.is_some() => {
                VideoSettlement::Completed(job.video)
            }
            Some(job) if job.status == JobStatus::Failed => VideoSettlement::Failed,
            _ => VideoSettlement::Pending,
        })
    }

    /// Stop every task and wait for them to exit. Jobs stay `processing`.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.active_count(), "Shutting down video supervisor");
        self.tracker.close();
        self.root.cancel();
        self.tracker.wait().await;
    }

    /// Recover from the previous process: jobs whose synchronous run was
    /// cut short are failed, and jobs still awaiting their video are polled
    /// again. Returns the number of resumed jobs.
    pub fn resume_pending(self: &Arc<Self>) -> Result<usize> {
        let (orphaned, pending) = {
            let conn = get_conn(&self.deps.db)?;
            (
                jobs::fail_orphaned(&conn, INTERRUPTED)?,
                jobs::list_pending_video_jobs(&conn)?,
            )
        };

        if !orphaned.is_empty() {
            tracing::warn!(count = orphaned.len(), "Failed jobs interrupted by restart");
        }
        for job_id in orphaned {
            self.publish(EventPayload::JobFailed {
                job_id,
                error: INTERRUPTED.to_string(),
            });
        }

        let mut resumed = 0;
        for job in pending {
            let Some(operation) = job.video_operation else {
                continue;
            };
            let task = VideoTask {
                job_id: job.id,
                wallet: job.created_by,
                operation,
                cache_key: job.cache_key,
            };
            if self.spawn(task) {
                resumed += 1;
            }
        }
        if resumed > 0 {
            tracing::info!(resumed, "Resumed pending video jobs");
        }
        Ok(resumed)
    }

    // -- task body -----------------------------------------------------------

    async fn run(
        &self,
        task: &VideoTask,
        token: &CancellationToken,
        abandoned: &AtomicBool,
        tx: &watch::Sender<TaskState>,
    ) -> TaskState {
        match self.poll_until_done(task, token, abandoned, tx).await {
            PollOutcome::Succeeded(uri) => match self.finish_success(task, &uri).await {
                Ok(true) => TaskState::Completed,
                Ok(false) => TaskState::Stopped,
                Err(e) => {
                    let message = format!("Failed to store generated video: {e}");
                    self.finish_failure(task, &message).await;
                    TaskState::Failed
                }
            },
            PollOutcome::Failed(message) => {
                self.finish_failure(task, &format!("Video generation failed: {message}"))
                    .await;
                TaskState::Failed
            }
            PollOutcome::TimedOut => {
                self.finish_failure(task, "Video generation timed out").await;
                TaskState::TimedOut
            }
            PollOutcome::Cancelled => {
                self.finish_failure(task, "Video generation cancelled").await;
                TaskState::Cancelled
            }
            PollOutcome::Stopped => {
                tracing::info!(job_id = %task.job_id, "Video polling stopped");
                TaskState::Stopped
            }
        }
    }

    async fn poll_until_done(
        &self,
        task: &VideoTask,
        token: &CancellationToken,
        abandoned: &AtomicBool,
        tx: &watch::Sender<TaskState>,
    ) -> PollOutcome {
        for attempt in 0..self.policy.max_attempts {
            let _ = tx.send(TaskState::Polling { attempt });

            tokio::select! {
                _ = token.cancelled() => return self.interrupted(abandoned),
                _ = tokio::time::sleep(self.policy.delay_for(attempt)) => {}
            }

            tracing::debug!(job_id = %task.job_id, attempt, "Polling video operation");
            let polled = tokio::select! {
                _ = token.cancelled() => return self.interrupted(abandoned),
                polled = self.deps.video.poll(&task.operation) => polled,
            };

            match polled {
                Ok(OperationState::Running) => {}
                Ok(OperationState::Succeeded { video_uri }) => {
                    return PollOutcome::Succeeded(video_uri)
                }
                Ok(OperationState::Failed { message }) => return PollOutcome::Failed(message),
                Err(e) => {
                    tracing::warn!(job_id = %task.job_id, attempt, "Video poll failed: {e}");
                }
            }
        }

        tracing::warn!(
            job_id = %task.job_id,
            attempts = self.policy.max_attempts,
            "Video operation did not finish in time"
        );
        PollOutcome::TimedOut
    }

    fn interrupted(&self, abandoned: &AtomicBool) -> PollOutcome {
        if self.root.is_cancelled() || abandoned.load(Ordering::SeqCst) {
            PollOutcome::Stopped
        } else {
            PollOutcome::Cancelled
        }
    }

    /// Store the video and complete the job. Returns false when the job had
    /// already left `processing`, in which case nothing else is recorded.
    async fn finish_success(&self, task: &VideoTask, video_uri: &str) -> Result<bool> {
        let data: Bytes = self.deps.video.download(video_uri).await?;
        let path = paths::video_path(&task.wallet, task.job_id);
        self.deps
            .store
            .put(&path, data, paths::content_type_for(&path))
            .await?;
        let signed = self.deps.store.sign_url(&path, self.deps.signed_url_ttl)?;

        let slot = MediaSlot {
            path: Some(path.clone()),
            url: Some(signed.url.clone()),
            url_expiry: Some(signed.expires_at),
        };
        let updated = {
            let conn = get_conn(&self.deps.db)?;
            jobs::complete_job(&conn, task.job_id, &slot)?
        };
        if !updated {
            tracing::warn!(job_id = %task.job_id, "Job was no longer processing; video not recorded");
            return Ok(false);
        }

        if let Some(key) = &task.cache_key {
            if let Err(e) = self.patch_cache(key, &slot).await {
                tracing::warn!(job_id = %task.job_id, "Failed to update cache entry: {e}");
            }
        }

        tracing::info!(job_id = %task.job_id, path = %path, "Video completed");
        self.publish(EventPayload::JobCompleted {
            job_id: task.job_id,
        });
        Ok(true)
    }

    async fn patch_cache(&self, key: &str, slot: &MediaSlot) -> Result<()> {
        let Some(value) = self.deps.cache.get(key).await? else {
            return Ok(());
        };
        let mut snapshot = CacheSnapshot::from_value(value)?;
        snapshot.complete_video(slot);
        self.deps
            .cache
            .set(key, snapshot.to_value()?, self.deps.cache_ttl_secs)
            .await
    }

    async fn finish_failure(&self, task: &VideoTask, message: &str) {
        tracing::warn!(job_id = %task.job_id, "{message}");

        let failed = get_conn(&self.deps.db)
            .and_then(|conn| jobs::fail_job(&conn, task.job_id, message));
        if let Err(e) = failed {
            tracing::error!(job_id = %task.job_id, "Failed to record video failure: {e}");
        }

        if let Some(key) = &task.cache_key {
            tracing::info!(job_id = %task.job_id, cache_key = %key, "Tombstoning cache entry");
            if let Err(e) = self.deps.cache.invalidate(key).await {
                tracing::warn!(job_id = %task.job_id, "Failed to invalidate cache entry: {e}");
            }
        }

        self.publish(EventPayload::JobFailed {
            job_id: task.job_id,
            error: message.to_string(),
        });
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(events) = &self.deps.events {
            events.publish(payload);
        }
    }
}
