//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, object storage, signed URLs, external AI
//! services, the NFT metadata source, and the result cache. Every section
//! defaults sensibly so a completely empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Environment variable overriding [`AiConfig::api_key`].
pub const ENV_AI_API_KEY: &str = "REELFORGE_AI_API_KEY";
/// Environment variable overriding [`VideoConfig::api_key`].
pub const ENV_VIDEO_API_KEY: &str = "REELFORGE_VIDEO_API_KEY";
/// Environment variable overriding [`StorageConfig::signing_secret`].
pub const ENV_SIGNING_SECRET: &str = "REELFORGE_SIGNING_SECRET";

const DEFAULT_SIGNING_SECRET: &str = "change-me";

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub urls: UrlConfig,
    pub ai: AiConfig,
    pub video: VideoConfig,
    pub nft: NftConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Replace secrets with values from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_AI_API_KEY).filter(|v| !v.is_empty()) {
            self.ai.api_key = Some(v);
        }
        if let Some(v) = lookup(ENV_VIDEO_API_KEY).filter(|v| !v.is_empty()) {
            self.video.api_key = Some(v);
        }
        if let Some(v) = lookup(ENV_SIGNING_SECRET).filter(|v| !v.is_empty()) {
            self.storage.signing_secret = v;
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.storage.signing_secret == DEFAULT_SIGNING_SECRET {
            warnings.push(
                "storage.signing_secret is the built-in default; signed URLs are forgeable".into(),
            );
        }

        if self.storage.signed_url_ttl_secs == 0 {
            warnings.push("storage.signed_url_ttl_secs is 0; URLs expire immediately".into());
        }

        if self.urls.refreshed_url_ttl_secs <= self.urls.refresh_buffer_secs {
            warnings.push(format!(
                "urls.refreshed_url_ttl_secs ({}) should exceed urls.refresh_buffer_secs ({}); \
                 refreshed URLs would be stale on arrival",
                self.urls.refreshed_url_ttl_secs, self.urls.refresh_buffer_secs
            ));
        }

        if self.ai.api_key.is_none() {
            warnings.push(format!("ai.api_key is not set (or {ENV_AI_API_KEY})"));
        }

        if self.video.api_key.is_none() {
            warnings.push(format!("video.api_key is not set (or {ENV_VIDEO_API_KEY})"));
        }

        if self.video.poll_max_attempts == 0 {
            warnings.push("video.poll_max_attempts is 0; every video job will time out".into());
        }

        if self.nft.metadata_base_url.is_empty() {
            warnings.push("nft.metadata_base_url is empty".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            db_path: PathBuf::from("./data/reelforge.db"),
        }
    }
}

/// Durable object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory backing the local object store.
    pub root_dir: PathBuf,
    /// Base URL signed links are minted against (the `/media` route).
    pub public_base_url: String,
    /// HMAC secret for signed URLs.
    pub signing_secret: String,
    /// Lifetime of URLs minted by the generation stages.
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./data/objects"),
            public_base_url: "http://localhost:8080/media".into(),
            signing_secret: DEFAULT_SIGNING_SECRET.into(),
            signed_url_ttl_secs: 3600,
        }
    }
}

impl StorageConfig {
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

/// Signed-URL refresh policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    /// A URL expiring within this window is considered stale.
    pub refresh_buffer_secs: u64,
    /// Lifetime of URLs re-minted by the URL manager.
    pub refreshed_url_ttl_secs: u64,
    /// Interval of the background sweep over expiring URLs.
    pub sweep_interval_secs: u64,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: 3600,
            refreshed_url_ttl_secs: 86_400,
            sweep_interval_secs: 900,
        }
    }
}

/// Text and image generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub text_model: String,
    pub image_model: String,
    /// Upper bound on the enhanced prompt length, in words.
    pub max_prompt_words: u32,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: None,
            text_model: "gpt-4o-mini".into(),
            image_model: "gpt-image-1".into(),
            max_prompt_words: 200,
            requests_per_second: 4,
            timeout_secs: 120,
        }
    }
}

/// Video generation service settings and status-poll policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub resolution: String,
    pub aspect_ratio: String,
    pub duration_secs: u32,
    pub fps: u32,
    pub poll_initial_delay_secs: u64,
    pub poll_max_delay_secs: u64,
    pub poll_max_attempts: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            api_key: None,
            model: "veo-2.0-generate-001".into(),
            resolution: "720p".into(),
            aspect_ratio: "16:9".into(),
            duration_secs: 5,
            fps: 24,
            poll_initial_delay_secs: 10,
            poll_max_delay_secs: 320,
            poll_max_attempts: 8,
        }
    }
}

/// NFT metadata source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NftConfig {
    pub metadata_base_url: String,
    /// Reject runs whose wallet is not the reported owner of the NFT.
    pub verify_ownership: bool,
}

impl Default for NftConfig {
    fn default() -> Self {
        Self {
            metadata_base_url: "http://localhost:8787".into(),
            verify_ownership: true,
        }
    }
}

/// Generation result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_days: u32,
    /// Number of normalized prompt characters folded into the fingerprint.
    /// `0` uses the whole prompt.
    pub prompt_prefix_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_days: 7,
            prompt_prefix_len: 50,
        }
    }
}

impl CacheConfig {
    pub fn ttl_secs(&self) -> i64 {
        i64::from(self.ttl_days) * 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.storage.signed_url_ttl_secs, 3600);
        assert_eq!(cfg.urls.refresh_buffer_secs, 3600);
        assert_eq!(cfg.video.poll_initial_delay_secs, 10);
        assert_eq!(cfg.cache.ttl_secs(), 7 * 86_400);
        assert_eq!(cfg.ai.max_prompt_words, 200);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert!(cfg.cache.enabled);
    }

    #[test]
    fn parse_partial_section() {
        let cfg = Config::from_json(r#"{"cache": {"prompt_prefix_len": 0}}"#).unwrap();
        assert_eq!(cfg.cache.prompt_prefix_len, 0);
        assert_eq!(cfg.cache.ttl_days, 7);
    }

    #[test]
    fn invalid_json_is_validation_error() {
        let err = Config::from_json("{").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/reelforge.json")));
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn default_secret_warns() {
        let warnings = Config::default().validate();
        assert!(warnings.iter().any(|w| w.contains("signing_secret")));
        assert!(warnings.iter().any(|w| w.contains("ai.api_key")));
    }

    #[test]
    fn short_refresh_ttl_warns() {
        let mut cfg = Config::default();
        cfg.urls.refreshed_url_ttl_secs = 600;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.contains("refreshed_url_ttl_secs")));
    }

    #[test]
    fn env_overrides_replace_secrets() {
        let mut cfg = Config::default();
        cfg.apply_overrides(|key| match key {
            ENV_AI_API_KEY => Some("sk-test".into()),
            ENV_SIGNING_SECRET => Some("s3cret".into()),
            _ => None,
        });
        assert_eq!(cfg.ai.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.storage.signing_secret, "s3cret");
        assert!(cfg.video.api_key.is_none());
    }
}
