//! OpenAI-compatible chat completions client (OpenRouter)

use crate::sleep::Sleeper;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the chat client
#[derive(Clone)]
pub struct ChatConfig {
    /// Full chat completions URL
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Attempts made when the API answers with a non-success status
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Input is cut to this many whitespace-separated words before prompting
    pub word_budget: usize,
    /// Timeout in seconds (default: 120)
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "openai/gpt-4o-mini".to_string(),
            max_tokens: 1000,
            temperature: 0.0,
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            word_budget: 1000,
            timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("max_attempts", &self.max_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("word_budget", &self.word_budget)
            .finish()
    }
}

/// Chat completions client
pub struct ChatClient {
    config: ChatConfig,
    client: reqwest::Client,
    sleeper: Arc<dyn Sleeper>,
}

impl ChatClient {
    pub fn new(config: ChatConfig, sleeper: Arc<dyn Sleeper>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            sleeper,
        })
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Send a single-message prompt and return the reply content
    ///
    /// Non-success statuses and transport errors are retried up to
    /// `max_attempts` times with `retry_delay` between attempts. A
    /// successful response whose envelope cannot be decoded is not retried
    /// and yields `Ok(None)`.
    pub async fn complete(&self, prompt: &str) -> Result<Option<String>> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.send(&request).await {
                Ok(body) => {
                    debug!("Chat reply received on attempt {}", attempt);
                    return Ok(Self::content(&body));
                }
                Err(e) => {
                    warn!("Chat request attempt {}/{} failed: {:#}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                self.sleeper.sleep(self.config.retry_delay).await;
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("no attempts made"))
            .context(format!("Chat API failed after {} attempts", attempts)))
    }

    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .context("Failed to reach chat API")?;

        if !response.status().is_success() {
            anyhow::bail!("Chat API error: {}", response.status());
        }

        response.text().await.context("Failed to read chat API response")
    }

    fn content(body: &str) -> Option<String> {
        match serde_json::from_str::<ChatResponse>(body) {
            Ok(parsed) => parsed
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message.content.trim().to_string()),
            Err(e) => {
                warn!("Malformed chat response envelope: {}", e);
                None
            }
        }
    }
}

/// Chat completions request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat completions response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep::InstantSleeper;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, sleeper: Arc<InstantSleeper>) -> ChatClient {
        let config = ChatConfig {
            base_url: format!("{}/chat/completions", server.uri()),
            api_key: "sk-test".to_string(),
            model: "test/model".to_string(),
            ..ChatConfig::default()
        };
        ChatClient::new(config, sleeper).unwrap()
    }

    #[test]
    fn test_chat_config_default() {
        let config = ChatConfig::default();
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(2));
        assert_eq!(config.word_budget, 1000);
    }

    #[test]
    fn test_chat_request_serialization() {
        let request = ChatRequest {
            model: "test/model".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: "Hello".to_string(),
            }],
            max_tokens: 1000,
            temperature: 0.0,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test/model");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 1000);
    }

    #[tokio::test]
    async fn test_complete_returns_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "test/model", "temperature": 0.0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "  [] \n"}}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(InstantSleeper::new()));
        assert_eq!(client.complete("hi").await.unwrap(), Some("[]".to_string()));
    }

    #[tokio::test]
    async fn test_complete_retries_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Aspirin"}}]
            })))
            .mount(&server)
            .await;

        let sleeper = Arc::new(InstantSleeper::new());
        let client = client_for(&server, sleeper.clone());
        assert_eq!(client.complete("hi").await.unwrap(), Some("Aspirin".to_string()));
        assert_eq!(sleeper.requested(), vec![Duration::from_secs(2); 2]);
    }

    #[tokio::test]
    async fn test_complete_gives_up_after_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server, Arc::new(InstantSleeper::new()));
        assert!(client.complete("hi").await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_envelope_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .expect(1)
            .mount(&server)
            .await;

        let sleeper = Arc::new(InstantSleeper::new());
        let client = client_for(&server, sleeper.clone());
        assert_eq!(client.complete("hi").await.unwrap(), None);
        assert!(sleeper.requested().is_empty());
    }
}
