//! Upstream failure classification.
//!
//! Every non-success response from a generation service is bucketed into an
//! [`UpstreamErrorKind`] and turned into an [`Error::Upstream`] whose message
//! carries a human-readable suggestion when the cause is recognizable.

use rf_core::Error;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamErrorKind {
    ContentPolicy,
    InvalidParameter,
    RateLimited,
    ServerError,
    Network,
    Other,
}

impl UpstreamErrorKind {
    /// Bucket a failure by HTTP status (if one was received) and message.
    pub fn classify(status: Option<u16>, message: &str) -> Self {
        let msg = message.to_ascii_lowercase();

        if ["content_policy", "content policy", "safety", "moderation", "prohibited"]
            .iter()
            .any(|needle| msg.contains(needle))
        {
            return Self::ContentPolicy;
        }

        match status {
            None => Self::Network,
            Some(429) => Self::RateLimited,
            Some(s) if s >= 500 => Self::ServerError,
            Some(400) | Some(422) => Self::InvalidParameter,
            Some(_) if msg.contains("rate limit") || msg.contains("quota") => Self::RateLimited,
            Some(_) if msg.contains("invalid") => Self::InvalidParameter,
            Some(_) => Self::Other,
        }
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ContentPolicy => {
                Some("Rephrase the prompt to avoid restricted content and try again.")
            }
            Self::InvalidParameter => {
                Some("Check the requested size, model, and other generation parameters.")
            }
            Self::RateLimited => Some("The service is rate limiting requests; wait and retry."),
            Self::ServerError => Some("The service reported an internal error; retry shortly."),
            Self::Network => Some("The service could not be reached; check the configured URL."),
            Self::Other => None,
        }
    }
}

/// Build an enriched [`Error::Upstream`] for `service`.
pub fn upstream_error(service: &str, status: Option<u16>, message: &str) -> Error {
    let kind = UpstreamErrorKind::classify(status, message);
    let mut text = match status {
        Some(s) => format!("{message} (HTTP {s})"),
        None => message.to_string(),
    };
    if let Some(suggestion) = kind.suggestion() {
        text.push_str(". ");
        text.push_str(suggestion);
    }
    tracing::debug!(service, ?kind, status, "Upstream call failed");
    Error::upstream(service, text)
}

/// Pull the most specific message out of an error body.
pub(crate) fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let candidates = [
            value.pointer("/error/message"),
            value.get("error"),
            value.get("message"),
        ];
        for candidate in candidates.into_iter().flatten() {
            if let Some(s) = candidate.as_str() {
                return s.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".into();
    }
    trimmed.chars().take(500).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        use UpstreamErrorKind::*;
        assert_eq!(
            UpstreamErrorKind::classify(Some(400), "Your request was rejected by our safety system"),
            ContentPolicy
        );
        assert_eq!(UpstreamErrorKind::classify(Some(429), "slow down"), RateLimited);
        assert_eq!(UpstreamErrorKind::classify(Some(400), "bad size"), InvalidParameter);
        assert_eq!(UpstreamErrorKind::classify(Some(503), "unavailable"), ServerError);
        assert_eq!(UpstreamErrorKind::classify(None, "connection refused"), Network);
        assert_eq!(UpstreamErrorKind::classify(Some(403), "quota exceeded"), RateLimited);
        assert_eq!(UpstreamErrorKind::classify(Some(404), "no such model"), Other);
    }

    #[test]
    fn enriched_message() {
        let err = upstream_error("image", Some(400), "size must be one of ...");
        let Error::Upstream { service, message } = err else {
            panic!("expected upstream error");
        };
        assert_eq!(service, "image");
        assert!(message.contains("HTTP 400"));
        assert!(message.contains("Check the requested size"));
    }

    #[test]
    fn unknown_kind_has_no_suggestion() {
        let err = upstream_error("text", Some(404), "gone");
        assert_eq!(err.to_string(), "Upstream error [text]: gone (HTTP 404)");
    }

    #[test]
    fn message_extraction() {
        assert_eq!(
            extract_message(r#"{"error":{"message":"nested","type":"x"}}"#),
            "nested"
        );
        assert_eq!(extract_message(r#"{"error":"flat"}"#), "flat");
        assert_eq!(extract_message(r#"{"message":"top"}"#), "top");
        assert_eq!(extract_message("plain text"), "plain text");
        assert_eq!(extract_message("  "), "empty response body");
    }
}
