//! Deterministic stand-ins for the external services, with call counters.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for integration tests elsewhere in the workspace.

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use rf_ai::{
    GeneratedImage, ImageGenerator, ImageRequest, MediaFetcher, NftData, NftProvider,
    OperationHandle, OperationState, TextGenerator, VideoGenerator, VideoRequest,
};
use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_core::{Error, Result};
use rf_db::pool::DbPool;
use rf_media::{LocalObjectStore, ObjectStore, UrlManager, UrlSigner};

use crate::cache::{CacheStore, SqliteCacheStore};
use crate::factory::{PipelineDeps, PipelineFactory, PipelineSettings};
use crate::poller::{PollPolicy, SupervisorDeps, VideoTaskSupervisor};
use crate::service::GenerationService;

/// A 2x2 opaque PNG.
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    // Encoding a 2x2 buffer into memory cannot fail.
    let _ = img.write_to(&mut out, image::ImageFormat::Png);
    out.into_inner()
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

pub struct StubTextGenerator {
    reply: Option<String>,
    calls: AtomicUsize,
    last_system: Mutex<Option<String>>,
}

impl StubTextGenerator {
    /// Replies with `"enhanced: <user message>"`.
    pub fn echoing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
            last_system: Mutex::new(None),
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            ..Self::echoing()
        }
    }

    /// Every call fails with an upstream error.
    pub fn failing() -> Self {
        Self {
            reply: Some(String::new()),
            ..Self::echoing()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_system_prompt(&self) -> Option<String> {
        self.last_system.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for StubTextGenerator {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system.lock() = Some(system.to_string());
        match &self.reply {
            None => Ok(format!("enhanced: {user}")),
            Some(r) if r.is_empty() => Err(Error::upstream("text", "service unavailable (HTTP 503)")),
            Some(r) => Ok(r.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Image
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageMode {
    Inline,
    Url,
    Fail,
}

pub struct StubImageGenerator {
    mode: ImageMode,
    generate_calls: AtomicUsize,
    edit_calls: AtomicUsize,
    last_request: Mutex<Option<ImageRequest>>,
}

impl StubImageGenerator {
    /// Returns the image inline as base64.
    pub fn inline() -> Self {
        Self::with_mode(ImageMode::Inline)
    }

    /// Returns a remote URL; pair with [`StubFetcher`].
    pub fn remote() -> Self {
        Self::with_mode(ImageMode::Url)
    }

    pub fn failing() -> Self {
        Self::with_mode(ImageMode::Fail)
    }

    fn with_mode(mode: ImageMode) -> Self {
        Self {
            mode,
            generate_calls: AtomicUsize::new(0),
            edit_calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn edit_calls(&self) -> usize {
        self.edit_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.generate_calls() + self.edit_calls()
    }

    pub fn last_request(&self) -> Option<ImageRequest> {
        self.last_request.lock().clone()
    }

    fn respond(&self, req: &ImageRequest) -> Result<GeneratedImage> {
        *self.last_request.lock() = Some(req.clone());
        match self.mode {
            ImageMode::Inline => Ok(GeneratedImage::Base64(STANDARD.encode(tiny_png()))),
            ImageMode::Url => Ok(GeneratedImage::Url("https://images.test/out.png".into())),
            ImageMode::Fail => Err(Error::upstream(
                "image",
                "Your request was rejected by the safety system",
            )),
        }
    }
}

#[async_trait]
impl ImageGenerator for StubImageGenerator {
    async fn generate(&self, req: &ImageRequest) -> Result<GeneratedImage> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(req)
    }

    async fn edit(&self, req: &ImageRequest, _reference_png: Bytes) -> Result<GeneratedImage> {
        self.edit_calls.fetch_add(1, Ordering::SeqCst);
        self.respond(req)
    }
}

// ---------------------------------------------------------------------------
// Video
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum VideoOutcome {
    SucceedAfter(usize),
    Fail(String),
    Never,
    RejectStart,
}

pub struct StubVideoGenerator {
    outcome: VideoOutcome,
    start_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl StubVideoGenerator {
    /// Reports `Running` for `running_polls` polls, then succeeds.
    pub fn succeeding_after(running_polls: usize) -> Self {
        Self::with_outcome(VideoOutcome::SucceedAfter(running_polls))
    }

    /// The operation starts, then reports failure on the first poll.
    pub fn failing(message: &str) -> Self {
        Self::with_outcome(VideoOutcome::Fail(message.to_string()))
    }

    pub fn never_finishing() -> Self {
        Self::with_outcome(VideoOutcome::Never)
    }

    /// `start` itself is rejected.
    pub fn rejecting() -> Self {
        Self::with_outcome(VideoOutcome::RejectStart)
    }

    fn with_outcome(outcome: VideoOutcome) -> Self {
        Self {
            outcome,
            start_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoGenerator for StubVideoGenerator {
    async fn start(&self, _req: &VideoRequest) -> Result<OperationHandle> {
        let n = self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.outcome == VideoOutcome::RejectStart {
            return Err(Error::upstream("video", "invalid parameter: duration (HTTP 400)"));
        }
        Ok(OperationHandle {
            name: format!("operations/stub-{}", n + 1),
        })
    }

    async fn poll(&self, _operation: &str) -> Result<OperationState> {
        let n = self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(match &self.outcome {
            VideoOutcome::SucceedAfter(running) if n >= *running => OperationState::Succeeded {
                video_uri: "https://videos.test/out.mp4".into(),
            },
            VideoOutcome::Fail(message) => OperationState::Failed {
                message: message.clone(),
            },
            _ => OperationState::Running,
        })
    }

    async fn download(&self, _video_uri: &str) -> Result<Bytes> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"))
    }
}

// ---------------------------------------------------------------------------
// NFT metadata and media fetch
// ---------------------------------------------------------------------------

pub struct StubNftProvider {
    nft: Option<NftData>,
    calls: AtomicUsize,
}

impl StubNftProvider {
    /// Knows one NFT owned by `owner`, with a reference image.
    pub fn owned_by(nft_id: &str, owner: &str) -> Self {
        Self {
            nft: Some(NftData {
                id: nft_id.to_string(),
                name: format!("Agent {nft_id}"),
                description: Some("A rogue operative".into()),
                image_url: Some(format!("https://nft.test/{nft_id}.png")),
                owner: Some(owner.to_string()),
                lore: Some("Exiled from the citadel".into()),
                ..Default::default()
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            nft: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NftProvider for StubNftProvider {
    async fn fetch(&self, nft_id: &str) -> Result<NftData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.nft
            .clone()
            .filter(|nft| nft.id == nft_id)
            .ok_or_else(|| Error::not_found("nft", nft_id))
    }
}

/// Serves [`tiny_png`] for every URL.
#[derive(Default)]
pub struct StubFetcher {
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl MediaFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        Ok(Bytes::from(tiny_png()))
    }
}

/// Bundle of stubs sharing counters with the dependencies handed to a
/// pipeline.
#[derive(Clone)]
pub struct Stubs {
    pub text: Arc<StubTextGenerator>,
    pub images: Arc<StubImageGenerator>,
    pub video: Arc<StubVideoGenerator>,
    pub nft: Arc<StubNftProvider>,
    pub fetcher: Arc<StubFetcher>,
}

impl Stubs {
    /// Everything succeeds; the video finishes on the first poll.
    pub fn happy(nft_id: &str, owner: &str) -> Self {
        Self {
            text: Arc::new(StubTextGenerator::echoing()),
            images: Arc::new(StubImageGenerator::inline()),
            video: Arc::new(StubVideoGenerator::succeeding_after(0)),
            nft: Arc::new(StubNftProvider::owned_by(nft_id, owner)),
            fetcher: Arc::new(StubFetcher::new()),
        }
    }

    pub fn with_images(mut self, images: StubImageGenerator) -> Self {
        self.images = Arc::new(images);
        self
    }

    pub fn with_video(mut self, video: StubVideoGenerator) -> Self {
        self.video = Arc::new(video);
        self
    }

    pub fn with_text(mut self, text: StubTextGenerator) -> Self {
        self.text = Arc::new(text);
        self
    }
}

// ---------------------------------------------------------------------------
// Service wiring
// ---------------------------------------------------------------------------

/// Signing secret used by [`stub_service`]'s object store.
pub const TEST_SIGNING_SECRET: &str = "test-secret";
/// Public base URL used by [`stub_service`]'s object store.
pub const TEST_MEDIA_BASE_URL: &str = "http://localhost/media";

/// Local store under `root` signing with the test secret.
pub fn test_store(root: &Path) -> LocalObjectStore {
    LocalObjectStore::new(root, UrlSigner::new(TEST_SIGNING_SECRET, TEST_MEDIA_BASE_URL))
}

/// Millisecond backoff so poller tests finish quickly.
pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        max_attempts: 2000,
    }
}

/// A [`GenerationService`] over `stubs`, storing objects under `root` and
/// caching in `db`.
pub fn stub_service(
    stubs: &Stubs,
    root: &Path,
    db: DbPool,
    policy: PollPolicy,
) -> GenerationService {
    let config = Config::default();
    let events = Arc::new(EventBus::new(256));
    let store: Arc<dyn ObjectStore> = Arc::new(test_store(root));
    let cache: Arc<dyn CacheStore> = Arc::new(SqliteCacheStore::new(db.clone()));

    let supervisor = Arc::new(VideoTaskSupervisor::new(
        SupervisorDeps {
            db: db.clone(),
            store: store.clone(),
            video: stubs.video.clone(),
            cache: cache.clone(),
            events: Some(events.clone()),
            signed_url_ttl: config.storage.signed_url_ttl(),
            cache_ttl_secs: config.cache.ttl_secs(),
        },
        policy,
    ));
    let factory = PipelineFactory::new(PipelineDeps {
        text: stubs.text.clone(),
        images: stubs.images.clone(),
        video: stubs.video.clone(),
        nft: stubs.nft.clone(),
        fetcher: stubs.fetcher.clone(),
        store: store.clone(),
        cache,
        supervisor: Some(supervisor.clone()),
        settings: PipelineSettings::from_config(&config),
    });
    let urls =
        Arc::new(UrlManager::new(db.clone(), store, &config.urls).with_events(events.clone()));
    GenerationService::new(db, factory, supervisor, urls, events)
}
