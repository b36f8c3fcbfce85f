use super::{ChatCompletion, CompletionRequest, LLMError, LLMProvider};
use crate::config::LLMConfig;
use crate::secrets::{scrub, SecretCache};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ceiling for the exponential backoff between attempts
const MAX_BACKOFF: Duration = Duration::from_secs(40);

/// OpenAI-compatible `/chat/completions` client
pub struct OpenAIProvider {
    config: LLMConfig,
    secret_cache: Arc<SecretCache>,
    client: reqwest::Client,
    initial_backoff: Duration,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig, secret_cache: Arc<SecretCache>) -> Self {
        Self {
            config,
            secret_cache,
            client: reqwest::Client::new(),
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// Override the first backoff delay (doubles on each retry)
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    async fn send_once(&self, request: &CompletionRequest) -> super::Result<ChatCompletion> {
        let api_key = self
            .secret_cache
            .get_secret(&self.config.api_key_name)
            .map_err(|e| LLMError::AuthenticationFailed(e.to_string()))?;

        let url = format!("{}/chat/completions", self.config.base_url);

        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(scrub(&e.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let text = scrub(&response.text().await.unwrap_or_default());

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                _ => LLMError::InvalidRequest(format!("{}: {}", status, text)),
            });
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        if completion.choices.is_empty() {
            return Err(LLMError::ParseError("No choices in response".to_string()));
        }

        Ok(completion)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> super::Result<ChatCompletion> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match self.send_once(request).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        "Completion attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, self.config.max_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    debug!("Completion failed after {} attempt(s)", attempt);
                    return Err(e);
                }
            }
        }
    }
}
