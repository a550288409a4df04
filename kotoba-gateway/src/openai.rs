//! OpenAI-compatible completion gateway.

use async_trait::async_trait;
use kotoba_core::gateway::{
    Completion, CompletionGateway, CompletionRequest, GatewayError, TokenUsage,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Chat-completions client for the OpenAI API or any compatible server.
pub struct OpenAIGateway {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAIGateway {
    /// Create a client against the official endpoint.
    pub fn new(api_key: &str) -> Result<Self, GatewayError> {
        Self::with_base_url(api_key, "https://api.openai.com")
    }

    /// Create a client against a custom base URL (Azure, local proxies).
    pub fn with_base_url(api_key: &str, base_url: impl Into<String>) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| GatewayError::Fatal(format!("invalid api key: {e}")))?;
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Fatal(format!("failed to build http client: {e}")))?;

        let base_url = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn classify_status(status: StatusCode, retry_after: Option<u64>, body: String) -> GatewayError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return GatewayError::RateLimited { retry_after };
        }
        if status.is_server_error() {
            return GatewayError::Transient(format!("upstream {status}: {body}"));
        }
        GatewayError::Fatal(format!("upstream {status}: {body}"))
    }
}

#[async_trait]
impl CompletionGateway for OpenAIGateway {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let wire_request = WireRequest::from(&request);

        let response = self
            .client
            .post(&url)
            .json(&wire_request)
            .send()
            .await
            .map_err(|e| GatewayError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "Completion request rejected");
            return Err(Self::classify_status(status, retry_after, body));
        }

        let wire_response: WireResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Fatal(format!("failed to parse response: {e}")))?;

        // An empty choices array maps to an empty reply; the caller decides
        // what that means for the turn.
        let text = wire_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        let usage = wire_response.usage.unwrap_or_default();

        Ok(Completion {
            text,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
}

impl From<&CompletionRequest> for WireRequest {
    fn from(request: &CompletionRequest) -> Self {
        Self {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
