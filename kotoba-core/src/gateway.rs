//! Completion gateway contract.
//!
//! The turn controller talks to the LLM through this trait only. Concrete
//! clients (HTTP, canned debug replies, retry decorators) live in the
//! `kotoba-gateway` crate; tests script the trait directly.

use crate::message::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error from a completion gateway, classified by retryability.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Upstream throttled the request. Retry after a delay.
    #[error("rate limited by upstream")]
    RateLimited {
        /// Server-suggested wait in seconds, when it sent one.
        retry_after: Option<u64>,
    },

    /// Upstream or network hiccup that a later attempt may clear.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Request is broken as issued. Retrying cannot help.
    #[error("completion request failed: {0}")]
    Fatal(String),
}

impl GatewayError {
    /// Whether a retry with the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }
}

/// A chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// Full prompt, system message first
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    pub temperature: f32,
    /// Reply length cap in tokens
    pub max_tokens: u32,
}

/// A completed reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Reply text as returned, untrimmed
    pub text: String,
    /// Token usage reported by the upstream
    pub usage: TokenUsage,
}

/// Token usage reported with a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Unified interface for completion backends.
#[async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Send one chat-completion request.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GatewayError>;
}
