//! Durable object storage.
//!
//! [`ObjectStore`] is the seam the pipeline uploads through; the bundled
//! [`LocalObjectStore`] keeps objects under a root directory and serves them
//! back through HMAC-signed URLs handled by the HTTP layer.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rf_core::config::StorageConfig;
use rf_core::{Error, Result};

use crate::signing::{SignedUrl, UrlSigner};

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `data` at `path`, creating intermediate prefixes.
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Bytes>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Mint a time-limited URL for an object.
    fn sign_url(&self, path: &str, ttl: Duration) -> Result<SignedUrl>;
}

/// Reject anything that could escape the store root.
pub fn validate_object_path(path: &str) -> Result<()> {
    if path.is_empty() || path.contains('\\') || path.contains('\0') {
        return Err(Error::Storage(format!("invalid object path: {path:?}")));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(Error::Storage(format!("invalid object path: {path:?}")));
    }
    Ok(())
}

/// Filesystem-backed object store.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
    signer: UrlSigner,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            signer,
        }
    }

    /// Store rooted at `storage.root_dir`, signing with the configured secret.
    pub fn from_config(storage: &StorageConfig) -> Self {
        Self::new(
            storage.root_dir.clone(),
            UrlSigner::new(&storage.signing_secret, storage.public_base_url.clone()),
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_object_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a partial object.
        let tmp = full.with_extension("partial");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &full).await?;

        tracing::debug!(path, content_type, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::not_found("object", path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    fn sign_url(&self, path: &str, ttl: Duration) -> Result<SignedUrl> {
        validate_object_path(path)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::Storage(format!("invalid URL ttl: {e}")))?;
        self.signer.sign(path, Utc::now() + ttl)
    }
}
