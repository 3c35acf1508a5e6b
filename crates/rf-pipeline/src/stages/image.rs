//! Still-frame generation.
//!
//! With a reference image the stage calls the edit endpoint, which only
//! accepts an RGBA PNG, a reduced set of sizes, and no style. Without one it
//! calls plain generation. Either way the result is stored under
//! `users/<wallet>/images/<job>_preview.<ext>` and served through a signed
//! URL; the thumbnail reuses the same object.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rf_ai::image::decode_base64_image;
use rf_ai::{GeneratedImage, ImageGenerator, ImageRequest, ImageSize, MediaFetcher};
use rf_core::StageId;
use rf_media::{images, paths, ObjectStore};

use crate::context::GenerationContext;
use crate::middleware::{Middleware, StageError};

pub struct ImageStage {
    images: Arc<dyn ImageGenerator>,
    fetcher: Arc<dyn MediaFetcher>,
    store: Arc<dyn ObjectStore>,
    url_ttl: Duration,
}

impl ImageStage {
    pub fn new(
        images: Arc<dyn ImageGenerator>,
        fetcher: Arc<dyn MediaFetcher>,
        store: Arc<dyn ObjectStore>,
        url_ttl: Duration,
    ) -> Self {
        Self {
            images,
            fetcher,
            store,
            url_ttl,
        }
    }

    async fn render(
        &self,
        ctx: &GenerationContext,
        prompt: &str,
    ) -> rf_core::Result<(Vec<u8>, ImageSize)> {
        let requested = match ctx.options.size.as_deref() {
            Some(s) => s.parse::<ImageSize>()?,
            None => ImageSize::default(),
        };

        let (image, size) = match ctx.reference_image_url() {
            Some(reference_url) => {
                let size = requested.coerce_for_reference();
                if size != requested {
                    tracing::info!(
                        requested = %requested,
                        using = %size,
                        "Size not supported with a reference image; using closest fit"
                    );
                }
                if let Some(style) = ctx.options.style.as_deref() {
                    tracing::info!(style, "Style is ignored when editing a reference image");
                }

                let reference = self.fetcher.fetch(reference_url).await?;
                let png = images::to_rgba_png(&reference)?;
                let req = ImageRequest {
                    prompt: prompt.to_string(),
                    size,
                    style: None,
                };
                (self.images.edit(&req, Bytes::from(png)).await?, size)
            }
            None => {
                let req = ImageRequest {
                    prompt: prompt.to_string(),
                    size: requested,
                    style: ctx.options.style.clone(),
                };
                (self.images.generate(&req).await?, requested)
            }
        };

        let data = match image {
            GeneratedImage::Base64(b64) => decode_base64_image(&b64)?,
            GeneratedImage::Url(url) => self.fetcher.fetch(&url).await?.to_vec(),
        };
        Ok((data, size))
    }
}

#[async_trait]
impl Middleware for ImageStage {
    fn stage(&self) -> StageId {
        StageId::Image
    }

    async fn execute(&self, ctx: &mut GenerationContext) -> Result<(), StageError> {
        let stage = StageId::Image;
        if ctx.restored_from_cache(stage) {
            tracing::debug!("Image restored from cache");
            return Ok(());
        }

        let prompt = ctx
            .effective_prompt()
            .map(str::to_string)
            .ok_or_else(|| StageError::precondition(stage, "a prompt is required"))?;
        let wallet = ctx
            .wallet_address
            .clone()
            .ok_or_else(|| StageError::precondition(stage, "walletAddress is required"))?;
        let job_id = ctx
            .job_id
            .ok_or_else(|| StageError::precondition(stage, "jobId is required"))?;

        let (data, size) = self
            .render(ctx, &prompt)
            .await
            .map_err(|e| StageError::from_error(stage, e))?;

        let path = paths::image_path(&wallet, job_id, images::extension_for(&data));
        self.store
            .put(&path, Bytes::from(data), paths::content_type_for(&path))
            .await
            .map_err(|e| StageError::from_error(stage, e))?;
        let signed = self
            .store
            .sign_url(&path, self.url_ttl)
            .map_err(|e| StageError::from_error(stage, e))?;

        tracing::info!(%job_id, %path, size = %size, "Stored generated image");
        ctx.image.image_path = Some(path.clone());
        ctx.image.image_url = Some(signed.url.clone());
        ctx.image.image_url_expiry = Some(signed.expires_at);
        ctx.image.thumbnail_path = Some(path);
        ctx.image.thumbnail_url = Some(signed.url);
        ctx.image.thumbnail_url_expiry = Some(signed.expires_at);
        ctx.image.size = Some(size);
        Ok(())
    }

    fn weight(&self) -> f32 {
        3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::StageErrorKind;
    use crate::stages::test_support::{context, context_with};
    use crate::testing::{StubFetcher, StubImageGenerator};
    use rf_media::{LocalObjectStore, UrlSigner};
    use serde_json::json;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<LocalObjectStore>,
        images: Arc<StubImageGenerator>,
        fetcher: Arc<StubFetcher>,
        stage: ImageStage,
    }

    fn fixture(images: StubImageGenerator) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(
            dir.path(),
            UrlSigner::new("secret", "http://localhost/media"),
        ));
        let images = Arc::new(images);
        let fetcher = Arc::new(StubFetcher::new());
        let stage = ImageStage::new(
            images.clone(),
            fetcher.clone(),
            store.clone(),
            Duration::from_secs(3600),
        );
        Fixture {
            _dir: dir,
            store,
            images,
            fetcher,
            stage,
        }
    }

    #[tokio::test]
    async fn generates_and_stores_without_reference() {
        let f = fixture(StubImageGenerator::inline());
        let mut ctx = context_with(json!({"style": "noir"}));
        f.stage.execute(&mut ctx).await.unwrap();

        assert_eq!(f.images.generate_calls(), 1);
        assert_eq!(f.images.last_request().unwrap().style.as_deref(), Some("noir"));

        let path = ctx.image.image_path.clone().unwrap();
        assert!(path.starts_with("users/Wallet1/images/"));
        assert!(path.ends_with("_preview.png"));
        assert_eq!(ctx.image.thumbnail_path.as_deref(), Some(path.as_str()));
        assert!(ctx.image.image_url.unwrap().contains("signature="));
        assert!(f.store.exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn reference_image_coerces_size_and_drops_style() {
        let f = fixture(StubImageGenerator::inline());
        let mut ctx = context_with(json!({"size": "1792x1024", "style": "noir"}));
        ctx.nft_image_url = Some("https://nft.test/nft-1.png".into());

        f.stage.execute(&mut ctx).await.unwrap();

        assert_eq!(f.images.edit_calls(), 1);
        let req = f.images.last_request().unwrap();
        assert_eq!(req.size, ImageSize::Landscape);
        assert!(req.style.is_none());
        assert_eq!(ctx.image.size, Some(ImageSize::Landscape));
        assert_eq!(f.fetcher.urls(), vec!["https://nft.test/nft-1.png".to_string()]);
    }

    #[tokio::test]
    async fn remote_result_is_downloaded() {
        let f = fixture(StubImageGenerator::remote());
        let mut ctx = context_with(json!({"useReferenceImage": false}));
        ctx.nft_image_url = Some("https://nft.test/nft-1.png".into());
        f.stage.execute(&mut ctx).await.unwrap();
        assert_eq!(f.images.generate_calls(), 1);
        assert_eq!(f.fetcher.urls(), vec!["https://images.test/out.png".to_string()]);
    }

    #[tokio::test]
    async fn upstream_rejection_is_classified() {
        let f = fixture(StubImageGenerator::failing());
        let mut ctx = context();
        let err = f.stage.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Upstream);
        assert!(ctx.image.image_path.is_none());
    }

    #[tokio::test]
    async fn missing_job_id_fails_before_any_call() {
        let f = fixture(StubImageGenerator::inline());
        let mut ctx = context();
        ctx.job_id = None;
        let err = f.stage.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Precondition);
        assert_eq!(f.images.calls(), 0);
    }

    #[tokio::test]
    async fn unknown_size_is_rejected() {
        let f = fixture(StubImageGenerator::inline());
        let mut ctx = context_with(json!({"size": "huge"}));
        let err = f.stage.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::Precondition);
    }
}
