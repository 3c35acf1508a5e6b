//! Pipeline factory: named pipeline configurations assembled from the stage
//! catalog.
//!
//! Every service client is constructed once, bundled in [`PipelineDeps`],
//! and shared by the pipelines the factory builds.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rf_ai::{ImageGenerator, MediaFetcher, NftProvider, TextGenerator, VideoGenerator};
use rf_core::config::{CacheConfig, Config, VideoConfig};
use rf_core::{Error, StageId};
use rf_media::ObjectStore;

use crate::cache::CacheStore;
use crate::middleware::Middleware;
use crate::pipeline::Pipeline;
use crate::poller::VideoTaskSupervisor;
use crate::stages::{
    AuthStage, CacheSaveStage, CachingStage, ErrorHandlingStage, ImageStage, LoggingStage,
    NftExtractionStage, PromptStage, VideoStage,
};

// ---------------------------------------------------------------------------
// PipelineKind
// ---------------------------------------------------------------------------

/// A named pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Standard,
    ImageOnly,
    PromptOnly,
    VideoOnly,
    /// Catalog names in order; `logging` and `errorHandling` are prepended.
    Custom(Vec<String>),
}

impl PipelineKind {
    /// Stage order for this configuration. Unknown custom names are skipped
    /// with a warning.
    pub fn stages(&self) -> Vec<StageId> {
        use StageId::*;
        match self {
            Self::Standard => vec![
                Logging,
                ErrorHandling,
                Auth,
                Caching,
                NftExtraction,
                Prompt,
                Image,
                Video,
                CacheSave,
            ],
            Self::ImageOnly => vec![
                Logging,
                ErrorHandling,
                Auth,
                Caching,
                NftExtraction,
                Prompt,
                Image,
                CacheSave,
            ],
            Self::PromptOnly => vec![Logging, ErrorHandling, Auth, Prompt],
            Self::VideoOnly => vec![Logging, ErrorHandling, Auth, Video],
            Self::Custom(names) => {
                let mut stages = vec![Logging, ErrorHandling];
                for name in names {
                    match name.trim().parse::<StageId>() {
                        Ok(Logging | ErrorHandling) => {}
                        Ok(stage) => stages.push(stage),
                        Err(_) => tracing::warn!(stage = %name, "Skipping unknown stage"),
                    }
                }
                stages
            }
        }
    }

    pub fn includes_video(&self) -> bool {
        self.stages().contains(&StageId::Video)
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::ImageOnly => f.write_str("image-only"),
            Self::PromptOnly => f.write_str("prompt-only"),
            Self::VideoOnly => f.write_str("video-only"),
            Self::Custom(names) => write!(f, "custom:{}", names.join(",")),
        }
    }
}

impl FromStr for PipelineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "standard" => Ok(Self::Standard),
            "image-only" => Ok(Self::ImageOnly),
            "prompt-only" => Ok(Self::PromptOnly),
            "video-only" => Ok(Self::VideoOnly),
            other => match other.strip_prefix("custom:") {
                Some(list) => Ok(Self::Custom(
                    list.split(',')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(String::from)
                        .collect(),
                )),
                None => Err(Error::Validation(format!("unknown pipeline '{other}'"))),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Dependencies
// ---------------------------------------------------------------------------

/// Tunables the stages read, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cache: CacheConfig,
    pub verify_ownership: bool,
    pub max_prompt_words: u32,
    pub signed_url_ttl: Duration,
    pub video: VideoConfig,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cache: config.cache.clone(),
            verify_ownership: config.nft.verify_ownership,
            max_prompt_words: config.ai.max_prompt_words,
            signed_url_ttl: config.storage.signed_url_ttl(),
            video: config.video.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Shared service handles injected into every stage.
#[derive(Clone)]
pub struct PipelineDeps {
    pub text: Arc<dyn TextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub video: Arc<dyn VideoGenerator>,
    pub nft: Arc<dyn NftProvider>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub store: Arc<dyn ObjectStore>,
    pub cache: Arc<dyn CacheStore>,
    /// When set, the video stage hands accepted operations to it and the
    /// cache-save stage settles entries against its outcomes.
    pub supervisor: Option<Arc<VideoTaskSupervisor>>,
    pub settings: PipelineSettings,
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PipelineFactory {
    deps: PipelineDeps,
}

impl PipelineFactory {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Build the pipeline for `kind`.
    pub fn build(&self, kind: &PipelineKind) -> Pipeline {
        let op = kind.to_string();
        let stages = kind
            .stages()
            .into_iter()
            .map(|stage| self.stage(stage, &op))
            .collect();
        Pipeline::new(op, stages)
    }

    /// Instantiate one catalog stage. `op` scopes the cache key.
    pub fn stage(&self, stage: StageId, op: &str) -> Arc<dyn Middleware> {
        let d = &self.deps;
        let s = &d.settings;
        match stage {
            StageId::Logging | StageId::Global => Arc::new(LoggingStage),
            StageId::ErrorHandling => Arc::new(ErrorHandlingStage),
            StageId::Auth => Arc::new(AuthStage),
            StageId::Caching => Arc::new(CachingStage::new(d.cache.clone(), s.cache.clone(), op)),
            StageId::NftExtraction => {
                Arc::new(NftExtractionStage::new(d.nft.clone(), s.verify_ownership))
            }
            StageId::Prompt => Arc::new(PromptStage::new(d.text.clone(), s.max_prompt_words)),
            StageId::Image => Arc::new(ImageStage::new(
                d.images.clone(),
                d.fetcher.clone(),
                d.store.clone(),
                s.signed_url_ttl,
            )),
            StageId::Video => {
                let stage = VideoStage::new(
                    d.video.clone(),
                    d.fetcher.clone(),
                    d.store.clone(),
                    s.video.clone(),
                );
                match &d.supervisor {
                    Some(supervisor) => Arc::new(stage.with_supervisor(supervisor.clone())),
                    None => Arc::new(stage),
                }
            }
            StageId::CacheSave => {
                let stage = CacheSaveStage::new(d.cache.clone(), s.cache.clone());
                match &d.supervisor {
                    Some(supervisor) => Arc::new(stage.with_supervisor(supervisor.clone())),
                    None => Arc::new(stage),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::testing::Stubs;
    use rf_media::{LocalObjectStore, UrlSigner};

    fn factory(dir: &std::path::Path) -> PipelineFactory {
        let stubs = Stubs::happy("nft-1", "Wallet1");
        PipelineFactory::new(PipelineDeps {
            text: stubs.text,
            images: stubs.images,
            video: stubs.video,
            nft: stubs.nft,
            fetcher: stubs.fetcher,
            store: Arc::new(LocalObjectStore::new(dir, UrlSigner::new("s", "http://m"))),
            cache: Arc::new(MemoryCacheStore::new()),
            supervisor: None,
            settings: PipelineSettings::default(),
        })
    }

    fn names(stages: &[StageId]) -> Vec<&'static str> {
        stages.iter().map(StageId::name).collect()
    }

    #[test]
    fn standard_order() {
        assert_eq!(
            names(&PipelineKind::Standard.stages()),
            vec![
                "logging",
                "errorHandling",
                "auth",
                "caching",
                "nftExtraction",
                "prompt",
                "image",
                "video",
                "cacheSave"
            ]
        );
        assert!(PipelineKind::Standard.includes_video());
        assert!(!PipelineKind::ImageOnly.includes_video());
    }

    #[test]
    fn named_kinds_parse() {
        for name in ["standard", "image-only", "prompt-only", "video-only"] {
            let kind: PipelineKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!("everything".parse::<PipelineKind>().is_err());
    }

    #[test]
    fn custom_prepends_and_skips_unknown() {
        let kind: PipelineKind = "custom:auth, teleport ,errorHandling,prompt".parse().unwrap();
        assert_eq!(
            names(&kind.stages()),
            vec!["logging", "errorHandling", "auth", "prompt"]
        );
        assert_eq!(kind.to_string(), "custom:auth,teleport,errorHandling,prompt");
    }

    #[test]
    fn build_uses_catalog_names() {
        let dir = tempfile::tempdir().unwrap();
        let f = factory(dir.path());
        let pipeline = f.build(&PipelineKind::VideoOnly);
        assert_eq!(pipeline.name(), "video-only");
        assert_eq!(
            names(&pipeline.stage_ids()),
            vec!["logging", "errorHandling", "auth", "video"]
        );
        assert!(pipeline.contains(StageId::Video));
        assert!(!f.build(&PipelineKind::PromptOnly).contains(StageId::Image));
    }
}
