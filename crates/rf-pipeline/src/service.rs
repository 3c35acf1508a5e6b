//! Generation service: the entry point that turns a request into a
//! persisted job.
//!
//! A job is created `queued`, moved to `processing` when its pipeline run
//! starts, and then either finished by the run itself or left `processing`
//! for the [`VideoTaskSupervisor`] to complete out of band.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rf_ai::{
    HttpFetcher, HttpNftProvider, HttpVideoClient, OpenAiImageClient, OpenAiTextClient,
    VideoGenerator,
};
use rf_core::config::Config;
use rf_core::events::{EventBus, EventPayload};
use rf_core::{Error, JobId, JobStatus, Result, VideoStatus};
use rf_db::models::{GenerationJob, MediaSlot};
use rf_db::pool::{get_conn, DbPool};
use rf_db::queries::jobs::{self, NewJob, PipelineOutput};
use rf_media::{LocalObjectStore, ObjectStore, UrlManager};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStore, SqliteCacheStore};
use crate::context::{GenerationContext, GenerationOptions, GenerationRequest, ProgressSender};
use crate::factory::{PipelineDeps, PipelineFactory, PipelineKind, PipelineSettings};
use crate::poller::{PollPolicy, SupervisorDeps, VideoTask, VideoTaskSupervisor};

const CANCELLED: &str = "Generation cancelled";

#[derive(Clone)]
pub struct GenerationService {
    db: DbPool,
    factory: PipelineFactory,
    supervisor: Arc<VideoTaskSupervisor>,
    urls: Arc<UrlManager>,
    events: Arc<EventBus>,
    /// Pipeline runs in flight, so `cancel` can stop them between stages.
    running: Arc<DashMap<JobId, CancellationToken>>,
}

impl GenerationService {
    pub fn new(
        db: DbPool,
        factory: PipelineFactory,
        supervisor: Arc<VideoTaskSupervisor>,
        urls: Arc<UrlManager>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            factory,
            supervisor,
            urls,
            events,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Wire the HTTP clients, local object store, and SQLite cache described
    /// by `config`.
    pub fn from_config(config: &Config, db: DbPool, events: Arc<EventBus>) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::from_config(&config.storage));
        let cache: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(db.clone()));
        let video: Arc<dyn VideoGenerator> = Arc::new(HttpVideoClient::new(&config.video)?);

        let supervisor = Arc::new(VideoTaskSupervisor::new(
            SupervisorDeps {
                db: db.clone(),
                store: store.clone(),
                video: video.clone(),
                cache: cache.clone(),
                events: Some(events.clone()),
                signed_url_ttl: config.storage.signed_url_ttl(),
                cache_ttl_secs: config.cache.ttl_secs(),
            },
            PollPolicy::from_config(&config.video),
        ));

        let deps = PipelineDeps {
            text: Arc::new(OpenAiTextClient::new(&config.ai)?),
            images: Arc::new(OpenAiImageClient::new(&config.ai)?),
            video,
            nft: Arc::new(HttpNftProvider::new(&config.nft)?),
            fetcher: Arc::new(HttpFetcher::new(Duration::from_secs(config.ai.timeout_secs))?),
            store: store.clone(),
            cache,
            supervisor: Some(supervisor.clone()),
            settings: PipelineSettings::from_config(config),
        };

        let urls = Arc::new(
            UrlManager::new(db.clone(), store, &config.urls).with_events(events.clone()),
        );
        Ok(Self::new(db, PipelineFactory::new(deps), supervisor, urls, events))
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn supervisor(&self) -> &Arc<VideoTaskSupervisor> {
        &self.supervisor
    }

    pub fn urls(&self) -> &Arc<UrlManager> {
        &self.urls
    }

    pub fn factory(&self) -> &PipelineFactory {
        &self.factory
    }

    // -- job lifecycle --------------------------------------------------------

    /// Validate `req` and insert a `queued` job for it.
    pub fn create_job(
        &self,
        kind: &PipelineKind,
        req: &GenerationRequest,
    ) -> Result<GenerationJob> {
        for (field, value) in [
            ("nftId", &req.nft_id),
            ("walletAddress", &req.wallet_address),
            ("userPrompt", &req.user_prompt),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("{field} is required")));
            }
        }
        GenerationOptions::from_value(&req.options)?;

        let job = {
            let conn = get_conn(&self.db)?;
            jobs::create_job(
                &conn,
                &NewJob {
                    nft_id: req.nft_id.trim(),
                    created_by: req.wallet_address.trim(),
                    pipeline_type: &kind.to_string(),
                    options: &req.options,
                },
            )?
        };

        tracing::info!(job_id = %job.id, pipeline = %kind, nft_id = %job.nft_id, "Job queued");
        self.events.publish(EventPayload::JobQueued { job_id: job.id });
        Ok(job)
    }

    /// Run the pipeline recorded on a queued job and persist the outcome.
    ///
    /// A failed run is not an `Err`: the returned job carries status
    /// `failed` and the error message.
    pub async fn run(&self, job_id: JobId, req: &GenerationRequest) -> Result<GenerationJob> {
        let kind: PipelineKind = {
            let conn = get_conn(&self.db)?;
            let job = jobs::require_job(&conn, job_id)?;
            let kind = job.pipeline_type.parse()?;
            if !jobs::mark_processing(&conn, job_id)? {
                return Err(Error::Conflict(format!(
                    "job {job_id} is {}, not queued",
                    job.status
                )));
            }
            kind
        };
        tracing::info!(%job_id, pipeline = %kind, "Job started");
        self.events.publish(EventPayload::JobStarted { job_id });

        let input = match GenerationContext::from_request(Some(job_id), req) {
            Ok(ctx) => ctx,
            Err(e) => return self.fail(job_id, &e.to_string()),
        };

        let token = CancellationToken::new();
        self.running.insert(job_id, token.clone());
        let events = self.events.clone();
        let progress = ProgressSender::new(move |progress, stage| {
            events.publish(EventPayload::JobStageCompleted {
                job_id,
                stage,
                progress,
            });
        });

        let pipeline = self.factory.build(&kind);
        let ctx = pipeline.execute_with(&input, &progress, &token).await;
        self.running.remove(&job_id);

        let persisted = self.persist(job_id, &ctx);
        match persisted {
            Ok(job) => self.urls.refresh_if_needed(job).await,
            Err(e) => {
                tracing::error!(%job_id, "Failed to persist pipeline output: {e}");
                self.supervisor.abandon(job_id);
                self.fail(job_id, &format!("Failed to persist pipeline output: {e}"))?;
                Err(e)
            }
        }
    }

    /// Create a job and run it to the end of its synchronous pipeline.
    pub async fn submit(
        &self,
        kind: &PipelineKind,
        req: &GenerationRequest,
    ) -> Result<GenerationJob> {
        let job = self.create_job(kind, req)?;
        self.run(job.id, req).await
    }

    fn persist(&self, job_id: JobId, ctx: &GenerationContext) -> Result<GenerationJob> {
        if ctx.is_failed() {
            let error = ctx
                .first_error()
                .unwrap_or_else(|| "Pipeline failed".to_string());
            return self.fail(job_id, &error);
        }

        let status = if ctx.video.video_path.is_some() {
            JobStatus::Completed
        } else if ctx.video.video_status == Some(VideoStatus::Processing) {
            JobStatus::Processing
        } else if ctx.image.image_path.is_some() || ctx.prompt.enhanced_prompt.is_some() {
            JobStatus::Completed
        } else {
            return self.fail(job_id, "Pipeline produced no output");
        };

        let output = PipelineOutput {
            image: MediaSlot {
                path: ctx.image.image_path.clone(),
                url: ctx.image.image_url.clone(),
                url_expiry: ctx.image.image_url_expiry,
            },
            thumbnail: MediaSlot {
                path: ctx.image.thumbnail_path.clone(),
                url: ctx.image.thumbnail_url.clone(),
                url_expiry: ctx.image.thumbnail_url_expiry,
            },
            video: MediaSlot {
                path: ctx.video.video_path.clone(),
                url: ctx.video.video_url.clone(),
                url_expiry: ctx.video.video_url_expiry,
            },
            video_operation: ctx.video.video_operation_name.clone(),
            enhanced_prompt: ctx.prompt.enhanced_prompt.clone(),
            cache_key: ctx.metadata.cache_key.clone(),
        };

        let job = {
            let conn = get_conn(&self.db)?;
            if !jobs::record_pipeline_output(&conn, job_id, &output, status)? {
                // Cancelled while the pipeline was running.
                tracing::warn!(%job_id, "Job left processing during the run; output discarded");
                self.supervisor.abandon(job_id);
            }
            jobs::require_job(&conn, job_id)?
        };

        match job.status {
            JobStatus::Completed => {
                tracing::info!(%job_id, cache_hit = ctx.metadata.cache_hit, "Job completed");
                self.events.publish(EventPayload::JobCompleted { job_id });
            }
            JobStatus::Processing => {
                let operation = job.video_operation.clone().unwrap_or_default();
                tracing::info!(%job_id, %operation, "Awaiting video");
                self.events.publish(EventPayload::JobVideoProcessing {
                    job_id,
                    operation: operation.clone(),
                });
                // The video stage skipped its start on a cache hit, so nobody
                // is following the cached operation for this job yet.
                if ctx.metadata.cache_hit && !operation.is_empty() {
                    self.supervisor.spawn(VideoTask {
                        job_id,
                        wallet: job.created_by.clone(),
                        operation,
                        cache_key: job.cache_key.clone(),
                    });
                }
            }
            _ => {}
        }
        Ok(job)
    }

    fn fail(&self, job_id: JobId, error: &str) -> Result<GenerationJob> {
        let job = {
            let conn = get_conn(&self.db)?;
            if jobs::fail_job(&conn, job_id, error)? {
                tracing::warn!(%job_id, error, "Job failed");
                self.events.publish(EventPayload::JobFailed {
                    job_id,
                    error: error.to_string(),
                });
            }
            jobs::require_job(&conn, job_id)?
        };
        Ok(job)
    }

    /// Stop a job: an in-flight pipeline run is cancelled between stages and
    /// video polling stops. The job is marked failed.
    pub async fn cancel(&self, job_id: JobId) -> Result<GenerationJob> {
        let job = {
            let conn = get_conn(&self.db)?;
            jobs::require_job(&conn, job_id)?
        };
        if job.status.is_terminal() {
            return Err(Error::Conflict(format!("job {job_id} is already {}", job.status)));
        }

        if let Some(token) = self.running.get(&job_id) {
            token.cancel();
        }
        if self.supervisor.cancel(job_id) {
            self.supervisor.wait(job_id).await;
        }
        self.fail(job_id, CANCELLED)
    }

    // -- reads ----------------------------------------------------------------

    /// Fetch a job, re-minting stale URLs first.
    pub async fn get_job(&self, job_id: JobId) -> Result<GenerationJob> {
        let job = {
            let conn = get_conn(&self.db)?;
            jobs::require_job(&conn, job_id)?
        };
        self.urls.refresh_if_needed(job).await
    }

    /// A wallet's jobs, newest first, with stale URLs re-minted.
    pub async fn list_for_wallet(
        &self,
        wallet: &str,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<GenerationJob>> {
        let list = {
            let conn = get_conn(&self.db)?;
            jobs::list_jobs_by_owner(&conn, wallet, offset, limit)?
        };
        Ok(self.urls.refresh_many(list).await)
    }

    /// Re-mint every URL of a job regardless of expiry.
    pub async fn refresh(&self, job_id: JobId) -> Result<GenerationJob> {
        self.urls.force_refresh(job_id).await
    }

    /// Stop background polling. Jobs awaiting their video stay `processing`
    /// and are picked up by [`VideoTaskSupervisor::resume_pending`] on the
    /// next start.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
