//! Text-completion client used by the task extractor.
//!
//! Two wire formats: Anthropic Messages (`/messages`) and any OpenAI-compatible
//! `/chat/completions` endpoint. The API key is never logged.

use crate::core::config::{LlmProvider, LlmSettings};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str = "You extract actionable tasks from chat messages. Reply with JSON only. No introductions, no commentary.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm api key not configured")]
    NotConfigured,

    #[error("llm request failed: {0}")]
    Transport(String),

    #[error("llm returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("llm response had no text content")]
    EmptyResponse,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt, return the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl HttpLlmClient {
    pub fn new(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match self.settings.provider {
            LlmProvider::Anthropic => format!("{}/messages", base),
            LlmProvider::OpenAi => format!("{}/chat/completions", base),
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        match self.settings.provider {
            LlmProvider::Anthropic => serde_json::json!({
                "model": self.settings.model,
                "max_tokens": self.settings.max_tokens,
                "temperature": 0.0,
                "system": SYSTEM_PROMPT,
                "messages": [
                    {"role": "user", "content": prompt}
                ]
            }),
            LlmProvider::OpenAi => serde_json::json!({
                "model": self.settings.model,
                "max_tokens": self.settings.max_tokens,
                "temperature": 0.0,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": prompt}
                ]
            }),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        // `LlmSettings::resolve` trims the key and drops blank ones.
        let api_key = self.settings.api_key.as_deref().ok_or(LlmError::NotConfigured)?;
        let url = self.endpoint();
        debug!(
            "llm_client: POST {} model={} prompt_chars={}",
            url,
            self.settings.model,
            prompt.len()
        );

        let builder = self
            .http
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&self.request_body(prompt));
        let builder = match self.settings.provider {
            LlmProvider::Anthropic => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            LlmProvider::OpenAi => builder.bearer_auth(api_key),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(format!("response json parse failed: {}", e)))?;

        reply_text(self.settings.provider, &value).ok_or(LlmError::EmptyResponse)
    }
}

/// Pull the reply text out of either provider's response shape.
pub fn reply_text(provider: LlmProvider, value: &serde_json::Value) -> Option<String> {
    let text = match provider {
        LlmProvider::Anthropic => value
            .get("content")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.iter().find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text")))
            .and_then(|b| b.get("text"))
            .and_then(|t| t.as_str()),
        LlmProvider::OpenAi => value
            .get("choices")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str()),
    };
    text.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(provider: LlmProvider) -> LlmSettings {
        LlmSettings {
            provider,
            api_key: Some("k".into()),
            base_url: "http://llm.invalid/v1/".into(),
            model: "m".into(),
            max_tokens: 1000,
            batch_size: 10,
        }
    }

    #[test]
    fn test_endpoints() {
        let a = HttpLlmClient::new(reqwest::Client::new(), settings(LlmProvider::Anthropic));
        assert_eq!(a.endpoint(), "http://llm.invalid/v1/messages");
        let o = HttpLlmClient::new(reqwest::Client::new(), settings(LlmProvider::OpenAi));
        assert_eq!(o.endpoint(), "http://llm.invalid/v1/chat/completions");
    }

    #[test]
    fn test_reply_text_shapes() {
        let anthropic = serde_json::json!({
            "content": [{"type": "text", "text": "  [] "}]
        });
        assert_eq!(reply_text(LlmProvider::Anthropic, &anthropic).as_deref(), Some("[]"));

        let openai = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "NONE"}}]
        });
        assert_eq!(reply_text(LlmProvider::OpenAi, &openai).as_deref(), Some("NONE"));

        let empty = serde_json::json!({"content": []});
        assert!(reply_text(LlmProvider::Anthropic, &empty).is_none());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let mut s = settings(LlmProvider::Anthropic);
        s.api_key = None;
        let client = HttpLlmClient::new(reqwest::Client::new(), s);
        assert!(matches!(client.complete("hi").await, Err(LlmError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_transport_error() {
        // Fails while building the request; no connection is attempted.
        let mut s = settings(LlmProvider::OpenAi);
        s.base_url = "not a url".into();
        let client = HttpLlmClient::new(reqwest::Client::new(), s);
        assert!(matches!(client.complete("hi").await, Err(LlmError::Transport(_))));
    }
}
