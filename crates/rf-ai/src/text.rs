//! Text generation (prompt enhancement).

use std::time::Duration;

use async_trait::async_trait;
use rf_core::config::AiConfig;
use rf_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::http::HttpClient;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Run one system + user completion and return the assistant text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiTextClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiTextClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(
                "text",
                Duration::from_secs(config.timeout_secs),
                config.requests_per_second,
            )?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.text_model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiTextClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.7,
        };

        let resp: ChatResponse = self
            .http
            .send_json(|c| {
                let req = c.post(&url).json(&body);
                match &self.api_key {
                    Some(key) => req.bearer_auth(key),
                    None => req,
                }
            })
            .await?;

        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::upstream("text", "completion contained no text"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> OpenAiTextClient {
        OpenAiTextClient::new(&AiConfig {
            base_url: base.to_string(),
            api_key: Some("sk-test".into()),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn completion_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "  A rain-soaked tower.  "}}]
            })))
            .mount(&server)
            .await;

        let text = client(&server.uri()).complete("sys", "user").await.unwrap();
        assert_eq!(text, "A rain-soaked tower.");
    }

    #[tokio::test]
    async fn empty_choice_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let err = client(&server.uri()).complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, Error::Upstream { .. }));
    }
}
