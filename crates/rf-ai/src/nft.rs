//! NFT metadata source.

use std::time::Duration;

use async_trait::async_trait;
use rf_core::config::NftConfig;
use rf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::http::HttpClient;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: serde_json::Value,
}

/// Metadata describing one NFT, including any lore attached to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub attributes: Vec<NftAttribute>,
    #[serde(default)]
    pub lore: Option<String>,
}

impl NftData {
    /// One-line summary used as prompt context.
    pub fn summary(&self) -> String {
        let mut out = self.name.clone();
        if let Some(desc) = self.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(": ");
            out.push_str(desc);
        }
        let traits: Vec<String> = self
            .attributes
            .iter()
            .map(|a| match &a.value {
                serde_json::Value::String(s) => format!("{}: {s}", a.trait_type),
                other => format!("{}: {other}", a.trait_type),
            })
            .collect();
        if !traits.is_empty() {
            out.push_str(" (");
            out.push_str(&traits.join(", "));
            out.push(')');
        }
        out
    }
}

#[async_trait]
pub trait NftProvider: Send + Sync {
    async fn fetch(&self, nft_id: &str) -> Result<NftData>;
}

/// Reads NFT metadata from `GET {base}/nfts/{id}`.
pub struct HttpNftProvider {
    http: HttpClient,
    base_url: String,
}

impl HttpNftProvider {
    pub fn new(config: &NftConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("nft", Duration::from_secs(30), 10)?,
            base_url: config.metadata_base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl NftProvider for HttpNftProvider {
    async fn fetch(&self, nft_id: &str) -> Result<NftData> {
        if nft_id.is_empty() || !nft_id.chars().all(|c| c.is_ascii_alphanumeric() || "-_:.".contains(c)) {
            return Err(Error::Validation(format!("invalid nft id '{nft_id}'")));
        }

        let url = format!("{}/nfts/{nft_id}", self.base_url);
        match self.http.send_json::<NftData, _>(|c| c.get(&url)).await {
            Ok(mut data) => {
                if data.id.is_empty() {
                    data.id = nft_id.to_string();
                }
                Ok(data)
            }
            Err(Error::Upstream { message, .. }) if message.contains("HTTP 404") => {
                Err(Error::not_found("nft", nft_id))
            }
            Err(e) => Err(e),
        }
    }
}
