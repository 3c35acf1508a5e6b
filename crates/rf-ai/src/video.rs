//! Video generation as a long-running remote operation.
//!
//! Starting a render returns an [`OperationHandle`] immediately; callers poll
//! it until it reaches a terminal [`OperationState`] and then download the
//! finished file.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use rf_core::config::VideoConfig;
use rf_core::{Error, Result};
use serde::Deserialize;
use serde_json::json;

use crate::http::HttpClient;

/// Everything needed to seed a render from a still frame.
#[derive(Debug, Clone)]
pub struct VideoRequest {
    pub prompt: String,
    pub image: Bytes,
    pub image_mime: String,
    pub resolution: String,
    pub aspect_ratio: String,
    pub duration_secs: u32,
    pub fps: u32,
    pub style: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState {
    Running,
    Succeeded { video_uri: String },
    Failed { message: String },
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn start(&self, req: &VideoRequest) -> Result<OperationHandle>;

    async fn poll(&self, operation: &str) -> Result<OperationState>;

    async fn download(&self, video_uri: &str) -> Result<Bytes>;
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct OperationResponse {
    #[serde(default)]
    done: bool,
    error: Option<OperationError>,
    response: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    message: Option<String>,
}

impl OperationResponse {
    fn into_state(self) -> OperationState {
        if !self.done {
            return OperationState::Running;
        }
        if let Some(err) = self.error {
            return OperationState::Failed {
                message: err
                    .message
                    .unwrap_or_else(|| "video generation failed".to_string()),
            };
        }

        let uri = self.response.as_ref().and_then(|r| {
            r.pointer("/generateVideoResponse/generatedSamples/0/video/uri")
                .or_else(|| r.pointer("/generatedVideos/0/video/uri"))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        });

        match uri {
            Some(video_uri) => OperationState::Succeeded { video_uri },
            None => OperationState::Failed {
                message: "operation finished without a video (possibly filtered by safety checks)"
                    .to_string(),
            },
        }
    }
}

/// Client for a `predictLongRunning`-style video endpoint.
pub struct HttpVideoClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpVideoClient {
    pub fn new(config: &VideoConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("video", Duration::from_secs(120), 2)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-goog-api-key", key),
            None => req,
        }
    }
}

#[async_trait]
impl VideoGenerator for HttpVideoClient {
    async fn start(&self, req: &VideoRequest) -> Result<OperationHandle> {
        let url = format!("{}/models/{}:predictLongRunning", self.base_url, self.model);

        let mut instance = json!({
            "prompt": req.prompt,
            "image": {
                "bytesBase64Encoded": STANDARD.encode(&req.image),
                "mimeType": req.image_mime,
            },
        });
        if let Some(style) = &req.style {
            instance["style"] = json!(style);
        }
        let body = json!({
            "instances": [instance],
            "parameters": {
                "aspectRatio": req.aspect_ratio,
                "resolution": req.resolution,
                "durationSeconds": req.duration_secs,
                "fps": req.fps,
                "sampleCount": 1,
            },
        });

        let resp: StartResponse = self
            .http
            .send_json(|c| self.auth(c.post(&url).json(&body)))
            .await?;
        tracing::debug!(operation = %resp.name, "Video operation started");
        Ok(OperationHandle { name: resp.name })
    }

    async fn poll(&self, operation: &str) -> Result<OperationState> {
        if operation.is_empty() || operation.contains("..") {
            return Err(Error::Validation(format!(
                "invalid operation name '{operation}'"
            )));
        }
        let url = format!("{}/{}", self.base_url, operation.trim_start_matches('/'));
        let resp: OperationResponse = self.http.send_json(|c| self.auth(c.get(&url))).await?;
        Ok(resp.into_state())
    }

    async fn download(&self, video_uri: &str) -> Result<Bytes> {
        self.http.send_bytes(|c| self.auth(c.get(video_uri))).await
    }
}
