//! Chat completion client for OpenAI-compatible endpoints.
//!
//! Epistemic foundation:
//! - K_i: LM Studio, vLLM, Ollama and hosted aggregators all speak the
//!   OpenAI chat completion schema
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - I^B: Network availability unknowable → retry with backoff

use crate::models::{BenchError, Result};
use reqwest::header::{
    AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Wait applied when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: f64 = 1.0;
/// Longest `Retry-After` honoured.
const MAX_RETRY_AFTER_SECS: f64 = 300.0;

/// Seconds to wait from a `Retry-After` header given in seconds.
///
/// Missing, unparsable and non-finite values fall back to the default;
/// everything else is clamped to `0..=MAX_RETRY_AFTER_SECS`.
fn retry_after_secs(header: Option<&HeaderValue>) -> f64 {
    header
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite())
        .map_or(DEFAULT_RETRY_AFTER_SECS, |secs| secs.clamp(0.0, MAX_RETRY_AFTER_SECS))
}

/// Message in a chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// API error response (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Generated content
    pub content: String,
    /// Model used (may differ from requested)
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Request duration
    pub duration: Duration,
}

/// Client for one OpenAI-compatible endpoint.
///
/// Retries transport errors, HTTP 429 and 5xx with exponential backoff.
/// Authentication and not-found errors are returned immediately.
pub struct LLMClient {
    client: reqwest::Client,
    /// Name of this endpoint (for logging)
    name: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    base_url: String,
    custom_headers: HashMap<String, String>,
    timeout: Duration,
    /// Attempts per request
    max_retries: u32,
    total_input_tokens: AtomicU64,
    total_output_tokens: AtomicU64,
}

impl LLMClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// - `name`: Endpoint name for logging (e.g., "local")
    /// - `api_key`: Optional API key (None for local endpoints)
    /// - `base_url`: Base URL for the API, without the `/chat/completions` suffix
    /// - `custom_headers`: Additional headers to include in requests
    /// - `timeout_secs`: Request timeout in seconds
    /// - `max_retries`: Attempts per request (at least one is always made)
    pub fn new(
        name: String,
        api_key: Option<String>,
        base_url: String,
        custom_headers: HashMap<String, String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BenchError::Network)?;

        Ok(Self {
            client,
            name,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            custom_headers,
            timeout,
            max_retries: max_retries.max(1),
            total_input_tokens: AtomicU64::new(0),
            total_output_tokens: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(api_key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (key, value) in &self.custom_headers {
            if let (Ok(name), Ok(val)) = (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, val);
            }
        }

        headers
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(2u64.pow(attempt.min(6)))
    }

    /// Complete a chat request.
    ///
    /// B_i(API available) → Result
    /// B_i(valid response) → Result
    /// I^B(rate limits) → honour retry-after, then retry
    pub async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        max_tokens: u32,
        temperature: f64,
    ) -> Result<CompletionResponse> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut last_error: Option<BenchError> = None;

        for attempt in 0..self.max_retries {
            let is_last = attempt + 1 == self.max_retries;

            let response = match self
                .client
                .post(&url)
                .headers(self.headers())
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        BenchError::Timeout(self.timeout)
                    } else {
                        BenchError::Network(e)
                    });
                    if !is_last {
                        let backoff = Self::backoff(attempt);
                        debug!(
                            endpoint = %self.name,
                            attempt = attempt,
                            backoff_secs = backoff.as_secs(),
                            "Retrying after network error"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();

            if status == 429 {
                let error = BenchError::RateLimited {
                    retry_after_secs: retry_after_secs(response.headers().get(RETRY_AFTER)),
                };

                if !is_last {
                    let wait = error.retry_after().unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    debug!(
                        endpoint = %self.name,
                        attempt = attempt,
                        retry_after_secs = wait,
                        "Rate limited, waiting"
                    );
                    tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                }
                last_error = Some(error);
                continue;
            }

            if !response.status().is_success() {
                let error_body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ApiErrorResponse>(&error_body)
                    .map(|api_error| api_error.error.message)
                    .unwrap_or(error_body);
                let error = BenchError::Api { status, message };

                // Client errors (auth, unknown model, bad request) are final
                if !error.is_retryable() {
                    return Err(error);
                }
                last_error = Some(error);

                if !is_last {
                    tokio::time::sleep(Self::backoff(attempt)).await;
                }
                continue;
            }

            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| BenchError::ParseError(format!("Failed to parse response: {e}")))?;

            let content = body
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content.unwrap_or_default())
                .ok_or_else(|| BenchError::ParseError("No choices in response".to_string()))?;

            let usage = body.usage.unwrap_or_default();
            self.total_input_tokens
                .fetch_add(usage.prompt_tokens as u64, Ordering::Relaxed);
            self.total_output_tokens
                .fetch_add(usage.completion_tokens as u64, Ordering::Relaxed);

            return Ok(CompletionResponse {
                content,
                model: body.model.unwrap_or_else(|| model.to_string()),
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                duration: start.elapsed(),
            });
        }

        Err(last_error.unwrap_or_else(|| {
            BenchError::Internal(format!("{}: no request attempted", self.name))
        }))
    }

    /// Get total tokens tracked as (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        (
            self.total_input_tokens.load(Ordering::Relaxed),
            self.total_output_tokens.load(Ordering::Relaxed),
        )
    }

    /// Health check: ping the /models endpoint.
    ///
    /// B_i: endpoint is healthy if /models returns 200
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let url = format!("{}/models", self.base_url);

        match self
            .client
            .get(&url)
            .headers(self.headers())
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(response) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                let healthy = response.status().is_success();
                HealthCheckResult {
                    endpoint: self.name.clone(),
                    status: if healthy {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Unhealthy
                    },
                    latency_ms: Some(latency_ms),
                    error: (!healthy).then(|| format!("HTTP {}", response.status().as_u16())),
                }
            }
            Err(e) => HealthCheckResult {
                endpoint: self.name.clone(),
                status: HealthStatus::Unreachable,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Health check result.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub endpoint: String,
    pub status: HealthStatus,
    /// Latency in milliseconds (if reachable)
    pub latency_ms: Option<u64>,
    /// Error message (if unhealthy or unreachable)
    pub error: Option<String>,
}

/// Health status of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unreachable,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{Reply, serve};

    #[test]
    fn test_request_serialization() {
        let messages = vec![Message::system("judge"), Message::user("a / b")];
        let request = ChatCompletionRequest {
            model: "meta-llama-3-8b-instruct",
            messages: &messages,
            max_tokens: 16,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "meta-llama-3-8b-instruct");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "a / b");
        assert_eq!(json["max_tokens"], 16);
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Yes"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("Yes"));
        assert!(parsed.usage.is_none());
        assert!(parsed.model.is_none());

        let body = r#"{"choices":[{"message":{"content":null}}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
        assert_eq!(parsed.usage.unwrap().completion_tokens, 1);
    }

    #[test]
    fn test_base_url_is_normalized() {
        let client = LLMClient::new(
            "local".into(),
            None,
            "http://localhost:1234/v1/".into(),
            HashMap::new(),
            5,
            0,
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:1234/v1");
        assert_eq!(client.max_retries, 1);
        assert_eq!(client.total_tokens(), (0, 0));
    }

    #[test]
    fn test_headers() {
        let mut custom = HashMap::new();
        custom.insert("X-Team".to_string(), "nlp".to_string());
        let client = LLMClient::new(
            "remote".into(),
            Some("sk-test".into()),
            "http://example.invalid/v1".into(),
            custom,
            5,
            3,
        )
        .unwrap();
        let headers = client.headers();
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["x-team"], "nlp");
    }

    fn client(base_url: String, max_retries: u32) -> LLMClient {
        LLMClient::new("mock".into(), None, base_url, HashMap::new(), 5, max_retries).unwrap()
    }

    async fn ask(client: &LLMClient) -> Result<CompletionResponse> {
        client
            .complete("test-model", &[Message::user("a / b")], 4, 0.0)
            .await
    }

    #[test]
    fn test_retry_after_parsing() {
        let secs = |s: &'static str| retry_after_secs(Some(&HeaderValue::from_static(s)));
        assert_eq!(retry_after_secs(None), DEFAULT_RETRY_AFTER_SECS);
        assert_eq!(secs("2.5"), 2.5);
        assert_eq!(secs(" 0 "), 0.0);
        assert_eq!(secs("-3"), 0.0);
        assert_eq!(secs("1e12"), MAX_RETRY_AFTER_SECS);
        assert_eq!(secs("inf"), DEFAULT_RETRY_AFTER_SECS);
        assert_eq!(secs("NaN"), DEFAULT_RETRY_AFTER_SECS);
        assert_eq!(secs("Wed, 21 Oct 2015 07:28:00 GMT"), DEFAULT_RETRY_AFTER_SECS);
    }

    #[tokio::test]
    async fn test_infinite_retry_after_still_retries() {
        let (url, accepted) = serve(vec![
            Reply::error(429, "slow down").header("Retry-After", "inf"),
            Reply::completion("Yes"),
        ])
        .await;
        let client = client(url, 2);

        let response = ask(&client).await.unwrap();
        assert_eq!(response.content, "Yes");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let (url, accepted) = serve(vec![
            Reply::error(429, "slow down").header("Retry-After", "0"),
            Reply::completion("No"),
        ])
        .await;
        let client = client(url, 3);

        let response = ask(&client).await.unwrap();
        assert_eq!(response.content, "No");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        assert_eq!(client.total_tokens(), (10, 1));
    }

    #[tokio::test]
    async fn test_server_error_then_success() {
        let (url, accepted) = serve(vec![
            Reply::error(503, "loading model"),
            Reply::completion("Yes"),
        ])
        .await;
        let client = client(url, 3);

        assert_eq!(ask(&client).await.unwrap().content, "Yes");
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_server_error_is_returned() {
        let (url, accepted) = serve(vec![
            Reply::error(500, "first"),
            Reply::error(502, "second"),
        ])
        .await;
        let client = client(url, 2);

        match ask(&client).await.unwrap_err() {
            BenchError::Api { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "second");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_final() {
        let (url, accepted) = serve(vec![Reply::error(404, "no such model")]).await;
        let client = client(url, 3);

        match ask(&client).await.unwrap_err() {
            BenchError::Api { status, .. } => assert_eq!(status, 404),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }
}
