//! Shared HTTP plumbing for the service clients.
//!
//! - Token-bucket rate limiting via [`governor`].
//! - Automatic retry on HTTP 429 honouring `Retry-After` (max 3 retries).
//! - Non-success responses become classified [`rf_core::Error::Upstream`]s.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::StatusCode;
use rf_core::{Error, Result};
use serde::de::DeserializeOwned;

use crate::error::{extract_message, upstream_error};

const MAX_RETRIES: u32 = 3;

pub struct HttpClient {
    client: reqwest::Client,
    limiter: DefaultDirectRateLimiter,
    service: &'static str,
}

impl HttpClient {
    pub fn new(service: &'static str, timeout: Duration, requests_per_second: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            limiter: RateLimiter::direct(quota),
            service,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Send a request built by `build`, retrying on 429.
    ///
    /// `build` is invoked once per attempt since request bodies are consumed.
    pub async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut retries = 0u32;
        loop {
            self.limiter.until_ready().await;

            let resp = build(&self.client)
                .send()
                .await
                .map_err(|e| upstream_error(self.service, None, &e.to_string()))?;

            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RETRIES {
                retries += 1;
                let wait = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                tracing::warn!(
                    service = self.service,
                    retry = retries,
                    wait_secs = wait,
                    "Upstream returned 429, backing off"
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(upstream_error(
                    self.service,
                    Some(status.as_u16()),
                    &extract_message(&body),
                ));
            }

            return Ok(resp);
        }
    }

    /// [`send`](Self::send) and decode a JSON body.
    pub async fn send_json<T, F>(&self, build: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let resp = self.send(build).await?;
        resp.json::<T>().await.map_err(|e| {
            Error::upstream(self.service, format!("unexpected response body: {e}"))
        })
    }

    /// [`send`](Self::send) and return the raw body.
    pub async fn send_bytes<F>(&self, build: F) -> Result<bytes::Bytes>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let resp = self.send(build).await?;
        resp.bytes()
            .await
            .map_err(|e| upstream_error(self.service, None, &e.to_string()))
    }
}
