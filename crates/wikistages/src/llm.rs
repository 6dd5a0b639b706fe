use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use wikicore::StageError;

/// Configuration for the LLM backend.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_KEY"))
            .unwrap_or_default();
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Self {
            api_key,
            base_url,
            model,
            temperature: 0.2,
            max_tokens: 2048,
            request_timeout: Duration::from_secs(120),
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// One prompt pair sent to the backend.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

/// Chat-completion backend used by the analysis and documentation stages.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, StageError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, OpenRouter, etc.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, StageError> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StageError::LlmRequest(format!("timeout contacting {}: {}", url, e))
                } else {
                    StageError::LlmRequest(format!("connection to {} failed: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StageError::LlmRequest(format!(
                "{} returned {}: {}",
                url,
                status.as_u16(),
                text
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| StageError::LlmResponse(format!("malformed completion payload: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| StageError::LlmResponse("completion had no content".to_string()))
    }
}

fn is_retryable(err: &StageError) -> bool {
    match err {
        StageError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn backoff_delay(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let ms = (initial_ms * 2u64.pow(attempt)).min(max_ms);
    // Jitter between 0.8x and 1.2x spreads concurrent retries apart.
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// Wraps a client with bounded retries for transient faults.
pub struct RetryingClient<C> {
    inner: C,
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl<C: LlmClient> RetryingClient<C> {
    pub fn new(inner: C, config: &LlmConfig) -> Self {
        Self {
            inner,
            max_retries: config.max_retries,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingClient<C> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, StageError> {
        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self.inner.complete(request).await {
                Ok(content) => return Ok(content),
                Err(err) => {
                    if is_retryable(&err) && attempt < self.max_retries {
                        let delay =
                            backoff_delay(attempt, self.initial_backoff_ms, self.max_backoff_ms);
                        tracing::warn!(
                            "Retrying LLM request in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            self.max_retries,
                            err
                        );
                        tokio::time::sleep(delay).await;
                        last_err = Some(err);
                        continue;
                    }
                    last_err = Some(err);
                    break;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| StageError::LlmRequest("all completion attempts failed".into())))
    }
}
