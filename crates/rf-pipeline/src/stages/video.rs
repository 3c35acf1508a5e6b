//! Video generation seeded by the still frame.
//!
//! The remote render is a long-running operation. This stage only starts
//! it, records the handle, and passes it to the [`VideoTaskSupervisor`];
//! the job record is completed out of band.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rf_ai::{MediaFetcher, Url, VideoGenerator, VideoRequest};
use rf_core::config::VideoConfig;
use rf_core::{StageId, VideoStatus};
use rf_media::{images, paths, ObjectStore};

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};
use crate::poller::{VideoTask, VideoTaskSupervisor};

pub struct VideoStage {
    video: Arc<dyn VideoGenerator>,
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<dyn ObjectStore>,
    supervisor: Option<Arc<VideoTaskSupervisor>>,
    defaults: VideoConfig,
}

impl VideoStage {
    pub fn new(
        video: Arc<dyn VideoGenerator>,
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn ObjectStore>,
        defaults: VideoConfig,
    ) -> Self {
        Self {
            video,
            fetcher,
            store,
            supervisor: None,
            defaults,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<VideoTaskSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    fn request(&self, ctx: &GenerationContext, prompt: String, image: Bytes) -> VideoRequest {
        let seed_name = format!("seed.{}", images::extension_for(&image));
        let image_mime = paths::content_type_for(&seed_name);
        let opts = &ctx.options;
        VideoRequest {
            prompt,
            image,
            image_mime: image_mime.to_string(),
            resolution: opts
                .resolution
                .clone()
                .unwrap_or_else(|| self.defaults.resolution.clone()),
            aspect_ratio: opts
                .aspect_ratio
                .clone()
                .unwrap_or_else(|| self.defaults.aspect_ratio.clone()),
            duration_secs: opts.duration_secs.unwrap_or(self.defaults.duration_secs),
            fps: opts.fps.unwrap_or(self.defaults.fps),
            style: opts.style.clone(),
        }
    }
}

/// The seed image URL must be an absolute http(s) URL.
fn validate_image_url(raw: &str) -> Result<(), StageError> {
    let url = Url::parse(raw).map_err(|e| {
        StageError::precondition(StageId::Video, format!("imageUrl is not a valid URL: {e}"))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(StageError::precondition(
            StageId::Video,
            format!("imageUrl must be http(s), got '{other}'"),
        )),
    }
}

#[async_trait]
impl Middleware for VideoStage {
    fn stage(&self) -> StageId {
        StageId::Video
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        let stage = StageId::Video;
        if ctx.restored_from_cache(stage) {
            tracing::debug!("Video restored from cache");
            return Ok(());
        }

        let prompt = ctx
            .effective_prompt()
            .map(str::to_string)
            .ok_or_else(|| StageError::precondition(stage, "a prompt is required"))?;
        let image_url = ctx
            .image
            .image_url
            .clone()
            .or_else(|| ctx.options.image_url.clone())
            .ok_or_else(|| StageError::precondition(stage, "imageUrl is required"))?;
        validate_image_url(&image_url)?;

        let image = match ctx.image.image_path.as_deref() {
            Some(path) => self.store.get(path).await,
            None => self.fetcher.fetch(&image_url).await,
        }
        .map_err(|e| StageError::from_error(stage, e))?;

        let req = self.request(ctx, prompt, image);
        let handle = self
            .video
            .start(&req)
            .await
            .map_err(|e| StageError::from_error(stage, e))?;

        tracing::info!(job_id = ?ctx.job_id, operation = %handle.name, "Video generation started");
        ctx.video.video_status = Some(VideoStatus::Processing);
        ctx.video.video_operation_name = Some(handle.name.clone());

        if let (Some(supervisor), Some(job_id), Some(wallet)) =
            (&self.supervisor, ctx.job_id, ctx.wallet_address.clone())
        {
            supervisor.spawn(VideoTask {
                job_id,
                wallet,
                operation: handle.name,
                cache_key: ctx.metadata.cache_key.clone(),
            });
        }
        Ok(())
    }

    /// A later stage failed; the caller records the job as failed, so stop
    /// following the operation without touching the job.
    async fn rollback(&self, ctx: &mut GenerationContext) -> rf_core::Result<()> {
        if let (Some(supervisor), Some(job_id)) = (&self.supervisor, ctx.job_id) {
            supervisor.abandon(job_id);
        }
        Ok(())
    }

    fn weight(&self) -> f32 {
        2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::middleware::StageErrorKind;
    use crate::poller::{PollPolicy, SupervisorDeps, TaskState};
    use crate::stages::test_support::{context, context_with};
    use crate::testing::{tiny_png, StubFetcher, StubVideoGenerator};
    use rf_db::pool::init_memory_pool;
    use rf_media::{LocalObjectStore, UrlSigner};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LocalObjectStore>,
        video: Arc<StubVideoGenerator>,
        fetcher: Arc<StubFetcher>,
    }

    fn fixture(video: StubVideoGenerator) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(
            dir.path(),
            UrlSigner::new("secret", "http://localhost/media"),
        ));
        Fixture {
            _dir: dir,
            store,
            video: Arc::new(video),
            fetcher: Arc::new(StubFetcher::new()),
        }
    }

    impl Fixture {
        fn stage(&self) -> VideoStage {
            VideoStage::new(
                self.video.clone(),
                self.fetcher.clone(),
                self.store.clone(),
                VideoConfig::default(),
            )
        }

        async fn with_stored_image(&self, ctx: &mut GenerationContext) {
            let path = "users/Wallet1/images/seed_preview.png";
            self.store
                .put(path, Bytes::from(tiny_png()), "image/png")
                .await
                .unwrap();
            ctx.image.image_path = Some(path.into());
            ctx.image.image_url = Some(format!("http://localhost/media/{path}?sig"));
        }
    }

    #[tokio::test]
    async fn starts_operation_and_returns_processing() {
        let f = fixture(StubVideoGenerator::succeeding_after(0));
        let mut ctx = context();
        f.with_stored_image(&mut ctx).await;

        f.stage().execute(&mut ctx).await.unwrap();
        assert_eq!(ctx.video.video_status, Some(VideoStatus::Processing));
        assert_eq!(ctx.video.video_operation_name.as_deref(), Some("operations/stub-1"));
        assert!(ctx.video.video_path.is_none());
        assert_eq!(f.video.start_calls(), 1);
        assert_eq!(f.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn seed_url_from_options_is_fetched() {
        let f = fixture(StubVideoGenerator::succeeding_after(0));
        let mut ctx = context_with(json!({"imageUrl": "https://cdn.test/seed.png"}));
        f.stage().execute(&mut ctx).await.unwrap();
        assert_eq!(f.fetcher.urls(), vec!["https://cdn.test/seed.png".to_string()]);
    }

    #[tokio::test]
    async fn invalid_seed_urls_fail_before_remote_calls() {
        let f = fixture(StubVideoGenerator::succeeding_after(0));
        for options in [
            json!({}),
            json!({"imageUrl": "not a url"}),
            json!({"imageUrl": "ftp://cdn.test/seed.png"}),
        ] {
            let mut ctx = context_with(options);
            let err = f.stage().execute(&mut ctx).await.unwrap_err();
            assert_eq!(err.kind, StageErrorKind::Precondition);
        }
        assert_eq!(f.video.start_calls(), 0);
        assert_eq!(f.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn rejected_start_is_upstream_error() {
        let f = fixture(StubVideoGenerator::rejecting());
        let mut ctx = context();
        f.with_stored_image(&mut ctx).await;
        let err = f.stage().execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Upstream);
        assert!(ctx.video.video_operation_name.is_none());
    }

    #[tokio::test]
    async fn cached_operation_is_not_restarted() {
        let f = fixture(StubVideoGenerator::succeeding_after(0));
        let mut ctx = context();
        ctx.metadata.cache_hit = true;
        ctx.video.video_operation_name = Some("operations/cached".into());
        f.stage().execute(&mut ctx).await.unwrap();
        assert_eq!(f.video.start_calls(), 0);
    }

    #[tokio::test]
    async fn hands_operation_to_supervisor() {
        let f = fixture(StubVideoGenerator::never_finishing());
        let supervisor = Arc::new(VideoTaskSupervisor::new(
            SupervisorDeps {
                db: init_memory_pool().unwrap(),
                store: f.store.clone(),
                video: f.video.clone(),
                cache: Arc::new(MemoryCacheStore::new()),
                events: None,
                signed_url_ttl: Duration::from_secs(60),
                cache_ttl_secs: 60,
            },
            PollPolicy {
                initial_delay: Duration::from_secs(60),
                max_delay: Duration::from_secs(60),
                max_attempts: 1,
            },
        ));
        let stage = f.stage().with_supervisor(supervisor.clone());

        let mut ctx = context();
        f.with_stored_image(&mut ctx).await;
        stage.execute(&mut ctx).await.unwrap();

        let job_id = ctx.job_id.unwrap();
        assert_eq!(supervisor.state(job_id), Some(TaskState::Polling { attempt: 0 }));

        stage.rollback(&mut ctx).await.unwrap();
        assert_eq!(supervisor.wait(job_id).await, Some(TaskState::Stopped));
    }
}
