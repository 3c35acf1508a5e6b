//! Image generation: standalone generation and reference-image edits.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use rf_core::config::AiConfig;
use rf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::http::HttpClient;

/// Output sizes understood by the image service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "256x256")]
    S256,
    #[serde(rename = "512x512")]
    S512,
    #[default]
    #[serde(rename = "1024x1024")]
    Square,
    #[serde(rename = "1536x1024")]
    Landscape,
    #[serde(rename = "1024x1536")]
    Portrait,
    #[serde(rename = "1792x1024")]
    WideLandscape,
    #[serde(rename = "1024x1792")]
    TallPortrait,
}

impl ImageSize {
    /// Sizes accepted by the reference-image (edit) endpoint.
    pub const REFERENCE_SIZES: [ImageSize; 3] =
        [ImageSize::Square, ImageSize::Landscape, ImageSize::Portrait];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "256x256",
            Self::S512 => "512x512",
            Self::Square => "1024x1024",
            Self::Landscape => "1536x1024",
            Self::Portrait => "1024x1536",
            Self::WideLandscape => "1792x1024",
            Self::TallPortrait => "1024x1792",
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::S256 => (256, 256),
            Self::S512 => (512, 512),
            Self::Square => (1024, 1024),
            Self::Landscape => (1536, 1024),
            Self::Portrait => (1024, 1536),
            Self::WideLandscape => (1792, 1024),
            Self::TallPortrait => (1024, 1792),
        }
    }

    /// Closest size the reference-image endpoint accepts, keeping the
    /// orientation.
    pub fn coerce_for_reference(self) -> ImageSize {
        if Self::REFERENCE_SIZES.contains(&self) {
            return self;
        }
        let (w, h) = self.dimensions();
        match w.cmp(&h) {
            std::cmp::Ordering::Greater => Self::Landscape,
            std::cmp::Ordering::Less => Self::Portrait,
            std::cmp::Ordering::Equal => Self::Square,
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::S256,
            Self::S512,
            Self::Square,
            Self::Landscape,
            Self::Portrait,
            Self::WideLandscape,
            Self::TallPortrait,
        ]
        .into_iter()
        .find(|size| size.as_str() == s)
        .ok_or_else(|| Error::Validation(format!("unsupported image size '{s}'")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: ImageSize,
    pub style: Option<String>,
}

/// An image as returned by the service: a remote URL or inline base64.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedImage {
    Url(String),
    Base64(String),
}

/// Decode an inline base64 image payload.
pub fn decode_base64_image(data: &str) -> Result<Vec<u8>> {
    let payload = data
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .unwrap_or(data);
    STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::upstream("image", format!("invalid base64 image data: {e}")))
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, req: &ImageRequest) -> Result<GeneratedImage>;

    /// Generate guided by a reference image, which must be an RGBA PNG.
    async fn edit(&self, req: &ImageRequest, reference_png: Bytes) -> Result<GeneratedImage>;
}

#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

impl ImagesResponse {
    fn into_image(self) -> Result<GeneratedImage> {
        let datum = self
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream("image", "response contained no images"))?;
        match (datum.b64_json, datum.url) {
            (Some(b64), _) => Ok(GeneratedImage::Base64(b64)),
            (None, Some(url)) => Ok(GeneratedImage::Url(url)),
            (None, None) => Err(Error::upstream("image", "image had neither url nor data")),
        }
    }
}

/// Client for OpenAI-compatible `/images/generations` and `/images/edits`.
pub struct OpenAiImageClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiImageClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(
                "image",
                Duration::from_secs(config.timeout_secs),
                config.requests_per_second,
            )?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.image_model.clone(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

fn png_part(data: &Bytes) -> reqwest::multipart::Part {
    let part = || reqwest::multipart::Part::bytes(data.to_vec()).file_name("reference.png");
    part().mime_str("image/png").unwrap_or_else(|_| part())
}

#[async_trait]
impl ImageGenerator for OpenAiImageClient {
    async fn generate(&self, req: &ImageRequest) -> Result<GeneratedImage> {
        let url = format!("{}/images/generations", self.base_url);
        let body = GenerationBody {
            model: &self.model,
            prompt: &req.prompt,
            size: req.size.as_str(),
            n: 1,
            style: req.style.as_deref(),
        };

        let resp: ImagesResponse = self
            .http
            .send_json(|c| self.auth(c.post(&url).json(&body)))
            .await?;
        resp.into_image()
    }

    async fn edit(&self, req: &ImageRequest, reference_png: Bytes) -> Result<GeneratedImage> {
        let url = format!("{}/images/edits", self.base_url);

        let resp: ImagesResponse = self
            .http
            .send_json(|c| {
                // Forms are consumed on send, so each attempt builds its own.
                let form = reqwest::multipart::Form::new()
                    .text("model", self.model.clone())
                    .text("prompt", req.prompt.clone())
                    .text("size", req.size.as_str())
                    .text("n", "1")
                    .part("image", png_part(&reference_png));
                self.auth(c.post(&url).multipart(form))
            })
            .await?;
        resp.into_image()
    }
}
