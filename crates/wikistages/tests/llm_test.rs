// crates/wikistages/tests/llm_test.rs

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wikicore::StageError;
use wikistages::{CompletionRequest, LlmClient, LlmConfig, OpenAiCompatClient, RetryingClient};

// Test config with near-zero backoff so retries do not slow the suite
fn fast_config(max_retries: u32) -> LlmConfig {
    LlmConfig {
        api_key: "test-key".to_string(),
        base_url: "http://127.0.0.1:9".to_string(),
        model: "test-model".to_string(),
        temperature: 0.0,
        max_tokens: 16,
        request_timeout: Duration::from_secs(2),
        max_retries,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
    }
}

// Fails the first `fail_first` calls with the given error, then succeeds
struct FlakyClient {
    attempts: Arc<AtomicU32>,
    fail_first: u32,
    error: fn() -> StageError,
}

#[async_trait]
impl LlmClient for FlakyClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, StageError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            Err((self.error)())
        } else {
            Ok("recovered".to_string())
        }
    }
}

fn rate_limited() -> StageError {
    StageError::LlmRequest("http://api.test/chat/completions returned 503: busy".to_string())
}

fn malformed() -> StageError {
    StageError::LlmResponse("completion had no content".to_string())
}

fn request() -> CompletionRequest {
    CompletionRequest::new("system prompt", "user prompt")
}

#[tokio::test]
async fn test_retrying_client_recovers_from_transient_errors() {
    let attempts = Arc::new(AtomicU32::new(0));
    let inner = FlakyClient {
        attempts: Arc::clone(&attempts),
        fail_first: 2,
        error: rate_limited,
    };
    let client = RetryingClient::new(inner, &fast_config(3));

    let content = client.complete(&request()).await.unwrap();

    assert_eq!(content, "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retrying_client_gives_up_after_budget() {
    let attempts = Arc::new(AtomicU32::new(0));
    let inner = FlakyClient {
        attempts: Arc::clone(&attempts),
        fail_first: u32::MAX,
        error: rate_limited,
    };
    let client = RetryingClient::new(inner, &fast_config(3));

    let err = client.complete(&request()).await.unwrap_err();

    assert!(matches!(err, StageError::LlmRequest(_)));
    // Initial attempt plus three retries
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_non_retryable_errors_fail_fast() {
    let attempts = Arc::new(AtomicU32::new(0));
    let inner = FlakyClient {
        attempts: Arc::clone(&attempts),
        fail_first: u32::MAX,
        error: malformed,
    };
    let client = RetryingClient::new(inner, &fast_config(3));

    let err = client.complete(&request()).await.unwrap_err();

    assert!(matches!(err, StageError::LlmResponse(_)));
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        1,
        "a malformed response is not transient"
    );
}

#[tokio::test]
async fn test_connection_errors_are_retried() {
    let attempts = Arc::new(AtomicU32::new(0));
    let inner = FlakyClient {
        attempts: Arc::clone(&attempts),
        fail_first: 1,
        error: || StageError::LlmRequest("connection to http://api.test failed".to_string()),
    };
    let client = RetryingClient::new(inner, &fast_config(3));

    client.complete(&request()).await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_retries_means_single_attempt() {
    let attempts = Arc::new(AtomicU32::new(0));
    let inner = FlakyClient {
        attempts: Arc::clone(&attempts),
        fail_first: u32::MAX,
        error: rate_limited,
    };
    let client = RetryingClient::new(inner, &fast_config(0));

    let _ = client.complete(&request()).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http_client_reports_unreachable_backend() {
    // Port 9 (discard) is not listening; the request errors out locally
    let client = OpenAiCompatClient::new(fast_config(0));

    let err = client.complete(&request()).await.unwrap_err();
    assert!(matches!(err, StageError::LlmRequest(_)), "got: {:?}", err);
}
