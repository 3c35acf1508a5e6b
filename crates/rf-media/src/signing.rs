//! HMAC-SHA256 signed URLs for stored objects.
//!
//! A signed URL has the shape `{base}/{path}?expires={unix}&signature={hex}`
//! where the signature covers `"{path}\n{expires}"`. Expiry is carried with
//! second precision, so the timestamp recorded next to a URL is exactly the
//! one the signature enforces.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use rf_core::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// A freshly minted URL plus the instant it stops verifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UrlSigner {
    secret: Vec<u8>,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            secret: secret.as_ref().to_vec(),
            base_url,
        }
    }

    fn mac(&self, path: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(format!("invalid signing key: {e}")))?;
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    /// Mint a URL for `path` that verifies until `expires_at` (truncated to
    /// whole seconds).
    pub fn sign(&self, path: &str, expires_at: DateTime<Utc>) -> Result<SignedUrl> {
        let expires = expires_at.timestamp();
        let signature = hex::encode(self.mac(path, expires)?.finalize().into_bytes());
        let expires_at = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or_else(|| Error::Internal(format!("expiry out of range: {expires}")))?;

        Ok(SignedUrl {
            url: format!(
                "{}/{}?expires={expires}&signature={signature}",
                self.base_url, path
            ),
            expires_at,
        })
    }

    /// Check a presented `(path, expires, signature)` triple.
    pub fn verify(&self, path: &str, expires: i64, signature: &str, now: DateTime<Utc>) -> bool {
        if signature.is_empty() || expires <= now.timestamp() {
            return false;
        }

        let Ok(mac) = self.mac(path, expires) else {
            return false;
        };

        let expected = match hex::decode(signature) {
            Ok(b) => b,
            Err(_) => return false,
        };

        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signer() -> UrlSigner {
        UrlSigner::new("test-secret", "http://localhost:8080/media/")
    }

    fn split(url: &str) -> (String, i64, String) {
        let (base, query) = url.split_once('?').unwrap();
        let path = base
            .strip_prefix("http://localhost:8080/media/")
            .unwrap()
            .to_string();
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.to_string(),
                _ => {}
            }
        }
        (path, expires, signature)
    }

    #[test]
    fn signed_url_verifies() {
        let s = signer();
        let signed = s
            .sign("users/w/images/j_preview.png", Utc::now() + Duration::hours(1))
            .unwrap();
        let (path, expires, sig) = split(&signed.url);

        assert_eq!(path, "users/w/images/j_preview.png");
        assert_eq!(expires, signed.expires_at.timestamp());
        assert!(s.verify(&path, expires, &sig, Utc::now()));
    }

    #[test]
    fn tampered_path_or_expiry_fails() {
        let s = signer();
        let signed = s.sign("a.png", Utc::now() + Duration::hours(1)).unwrap();
        let (path, expires, sig) = split(&signed.url);

        assert!(!s.verify("b.png", expires, &sig, Utc::now()));
        assert!(!s.verify(&path, expires + 60, &sig, Utc::now()));
        assert!(!s.verify(&path, expires, "zz", Utc::now()));
        assert!(!s.verify(&path, expires, "", Utc::now()));
    }

    #[test]
    fn expired_url_fails() {
        let s = signer();
        let signed = s.sign("a.png", Utc::now() + Duration::seconds(30)).unwrap();
        let (path, expires, sig) = split(&signed.url);
        assert!(!s.verify(&path, expires, &sig, Utc::now() + Duration::minutes(1)));
    }

    #[test]
    fn other_secret_fails() {
        let signed = signer()
            .sign("a.png", Utc::now() + Duration::hours(1))
            .unwrap();
        let (path, expires, sig) = split(&signed.url);
        let other = UrlSigner::new("another", "http://localhost:8080/media");
        assert!(!other.verify(&path, expires, &sig, Utc::now()));
    }

    #[test]
    fn expiry_is_whole_seconds() {
        let signed = signer()
            .sign("a.png", Utc::now() + Duration::milliseconds(3_600_500))
            .unwrap();
        assert_eq!(signed.expires_at.timestamp_subsec_nanos(), 0);
    }
}
