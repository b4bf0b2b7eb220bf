/// Client for OpenAI-compatible HTTP backends (`/chat/completions`, `/embeddings`).
///
/// Ollama exposes the same surface under `http://localhost:11434/v1`, which is the default.
/// Retries and timeouts are off unless configured.
use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CommonError;

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Exponential backoff between attempts. `max_retries == 0` means a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based): initial * 2^retry, capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub max_error_body_bytes: usize,
}

impl Default for OpenAiClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: None,
            retry: RetryPolicy::default(),
            max_error_body_bytes: 8 * 1024,
        }
    }
}

impl OpenAiClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable numbers fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let base_url = lookup("OPENAI_BASE_URL")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.base_url);

        let retry = RetryPolicy {
            max_retries: number("OPENAI_MAX_RETRIES")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.retry.max_retries),
            initial_backoff: number("OPENAI_RETRY_INITIAL_MS")
                .map_or(defaults.retry.initial_backoff, Duration::from_millis),
            max_backoff: number("OPENAI_RETRY_MAX_MS")
                .map_or(defaults.retry.max_backoff, Duration::from_millis),
        };

        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()),
            timeout: number("OPENAI_TIMEOUT_SECS")
                .filter(|&n| n > 0)
                .map(Duration::from_secs),
            retry,
            max_error_body_bytes: number("OPENAI_MAX_ERROR_BODY_BYTES")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.max_error_body_bytes),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenAiClientError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("undecodable {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{endpoint} returned {status}: {message}")]
    Status {
        endpoint: &'static str,
        status: StatusCode,
        message: String,
    },
}

impl OpenAiClientError {
    /// The backend could not be reached or is overloaded; the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                source.is_connect() || source.is_timeout() || source.is_request()
            }
            Self::Status { status, .. } => matches!(
                *status,
                StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::BAD_GATEWAY
                    | StatusCode::SERVICE_UNAVAILABLE
                    | StatusCode::GATEWAY_TIMEOUT
            ),
            Self::Decode { .. } => false,
        }
    }
}

impl From<OpenAiClientError> for CommonError {
    fn from(err: OpenAiClientError) -> Self {
        if err.is_transient() {
            CommonError::UpstreamUnavailable(err.to_string())
        } else {
            CommonError::Model(err.to_string())
        }
    }
}

#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiClientConfig,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(config: OpenAiClientConfig) -> Result<Self, OpenAiClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("rag-common/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| OpenAiClientError::Transport {
                endpoint: "client",
                source,
            })?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &OpenAiClientConfig {
        &self.config
    }

    pub async fn chat_completions(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, OpenAiClientError> {
        self.post_json("chat/completions", request).await
    }

    pub async fn embeddings(
        &self,
        request: &EmbeddingRequest,
    ) -> Result<EmbeddingResponse, OpenAiClientError> {
        self.post_json("embeddings", request).await
    }

    async fn post_json<Req, Resp>(
        &self,
        endpoint: &'static str,
        body: &Req,
    ) -> Result<Resp, OpenAiClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{endpoint}", self.config.base_url);
        let mut retry = 0;
        loop {
            match self.post_once(endpoint, &url, body).await {
                Err(e) if e.is_transient() && retry < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay(retry);
                    warn!(
                        endpoint,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "backend request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }

    async fn post_once<Req, Resp>(
        &self,
        endpoint: &'static str,
        url: &str,
        body: &Req,
    ) -> Result<Resp, OpenAiClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let transport = |source: reqwest::Error| OpenAiClientError::Transport { endpoint, source };

        let mut builder = self.http.post(url).json(body);
        if let Some(timeout) = self.config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(transport)?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(transport)?;
        debug!(endpoint, %status, bytes = bytes.len(), "backend responded");

        if !status.is_success() {
            let message = error_message(&bytes, self.config.max_error_body_bytes);
            return Err(OpenAiClientError::Status {
                endpoint,
                status,
                message,
            });
        }
        serde_json::from_slice(&bytes)
            .map_err(|source| OpenAiClientError::Decode { endpoint, source })
    }
}

/// `error.message` from an OpenAI-style error envelope, else the body cut to `max_bytes`.
fn error_message(body: &[u8], max_bytes: usize) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: ErrorObject,
    }
    #[derive(Deserialize)]
    struct ErrorObject {
        message: Option<String>,
    }

    if let Ok(Envelope {
        error: ErrorObject {
            message: Some(message),
        },
    }) = serde_json::from_slice(body)
    {
        return message;
    }
    let end = body.len().min(max_bytes);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChoice {
    pub message: ChatCompletionMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub index: usize,
}
