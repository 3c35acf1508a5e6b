//! Plain downloads of remote media (reference images, generated results).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rf_core::{Error, Result};

use crate::http::HttpClient;

/// Largest object a fetch will accept.
const MAX_FETCH_BYTES: usize = 64 * 1024 * 1024;

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

pub struct HttpFetcher {
    http: HttpClient,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("fetch", timeout, 20)?,
        })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| Error::Validation(format!("invalid media URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let data = self.http.send_bytes(|c| c.get(parsed.clone())).await?;
        if data.len() > MAX_FETCH_BYTES {
            return Err(Error::upstream(
                "fetch",
                format!("object at {url} exceeds {MAX_FETCH_BYTES} bytes"),
            ));
        }
        tracing::debug!(url, bytes = data.len(), "Fetched media");
        Ok(data)
    }
}
