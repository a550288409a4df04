//! Turn controller.
//!
//! Drives one full user turn: route the inbound text to its live session,
//! append and persist the user message, enforce the token budget, call the
//! completion gateway, deliver the reply, and handle the session-ending
//! paths (budget overflow, farewell keywords, explicit end). On gateway
//! failure the just-appended user turn is rolled back so the user can
//! simply resend.

use crate::budget::{self, CountError};
use crate::gateway::{CompletionGateway, CompletionRequest, GatewayError};
use crate::message::{ChannelId, UserId};
use crate::registry::{RegistryError, SessionKind, SessionRegistry};
use crate::session::SessionError;
use crate::transport::{InboundMessage, ThreadTransport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// User-facing notice strings (zh-TW, the bot's audience).
pub mod notices {
    /// Sent when the prompt exceeds the token budget; the session ends.
    pub fn over_budget(max_prompt_tokens: usize) -> String {
        format!("對話已經超過 {max_prompt_tokens} 個token，請重新開始一個新的對話。")
    }

    /// Sent when the model returned an empty reply.
    pub const EMPTY_REPLY: &str = "沒有生成任何回應。";

    /// Sent when completion failed for good; details stay in the logs.
    pub const GENERATION_FAILED: &str = "生成對話時發生錯誤，請稍後再試。";
}

/// Tuning for turn handling.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Model requested from the gateway; must be in the budget table.
    pub model: String,
    /// Sampling temperature passed through to the gateway.
    pub temperature: f32,
    /// Reply length cap passed through to the gateway.
    pub max_tokens: u32,
    /// Hard prompt budget; a turn that exceeds it ends the session.
    pub max_prompt_tokens: usize,
    /// Farewell phrases in a reply that end the session.
    pub termination_keywords: Vec<String>,
    /// Pause between a farewell reply and thread teardown.
    pub grace_delay: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.9,
            max_tokens: 150,
            max_prompt_tokens: 3_500,
            termination_keywords: vec!["掰掰".to_string(), "再見".to_string()],
            grace_delay: Duration::from_secs(3),
        }
    }
}

/// How a handled turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply delivered, session continues.
    Replied,
    /// Prompt exceeded the budget; session ended without a gateway call.
    OverBudget,
    /// Reply contained a farewell; session ended after the grace delay.
    Terminated,
    /// Model produced no text; user turn rolled back, session continues.
    EmptyReply,
    /// Gateway failed; user turn rolled back, session continues.
    Failed,
    /// Message did not belong to any live session thread.
    Unrouted,
}

/// Infrastructure error during a turn. User-visible conditions are
/// outcomes, not errors; these are for the log.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("token counting failed: {0}")]
    Count(#[from] CountError),
}

/// Orchestrates turns over the registry, gateway and transport.
pub struct TurnController {
    registry: Arc<SessionRegistry>,
    gateway: Arc<dyn CompletionGateway>,
    transport: Arc<dyn ThreadTransport>,
    config: TurnConfig,
}

impl TurnController {
    pub fn new(
        registry: Arc<SessionRegistry>,
        gateway: Arc<dyn CompletionGateway>,
        transport: Arc<dyn ThreadTransport>,
        config: TurnConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            transport,
            config,
        }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    /// Handle one inbound user message.
    ///
    /// Returns [`TurnOutcome::Unrouted`] when the message is not in any of
    /// the user's live session threads. The per-session mutex is held for
    /// the whole turn, so a user's second message waits for the first.
    pub async fn handle_message(&self, inbound: &InboundMessage) -> Result<TurnOutcome, TurnError> {
        let Some((kind, entry)) = self
            .registry
            .find_by_channel(inbound.user.id, inbound.channel)?
        else {
            return Ok(TurnOutcome::Unrouted);
        };

        let mut session = entry.session.lock().await;
        let snapshot = session.snapshot();
        let prompt = session.prepare_user_turn(&inbound.text).await?;

        let prompt_tokens = budget::count_tokens(&prompt, &self.config.model)?;
        tracing::debug!(
            user = %inbound.user.id,
            kind = %kind,
            prompt_tokens,
            "Prompt assembled"
        );

        if prompt_tokens > self.config.max_prompt_tokens {
            tracing::info!(
                user = %inbound.user.id,
                kind = %kind,
                prompt_tokens,
                limit = self.config.max_prompt_tokens,
                "Prompt over budget, ending session"
            );
            drop(session);
            self.transport
                .send(inbound.channel, &notices::over_budget(self.config.max_prompt_tokens))
                .await?;
            self.end_session(inbound.user.id, kind).await?;
            return Ok(TurnOutcome::OverBudget);
        }

        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: prompt,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        match self.gateway.complete(request).await {
            Ok(completion) => {
                let reply = completion.text.trim().to_string();
                if reply.is_empty() {
                    tracing::warn!(user = %inbound.user.id, "Model returned empty reply");
                    session.restore(snapshot).await?;
                    drop(session);
                    self.transport
                        .send(inbound.channel, notices::EMPTY_REPLY)
                        .await?;
                    return Ok(TurnOutcome::EmptyReply);
                }

                session.append_assistant_turn(&reply).await?;
                drop(session);
                self.transport.send(inbound.channel, &reply).await?;

                if self.is_farewell(&reply) {
                    tracing::info!(
                        user = %inbound.user.id,
                        kind = %kind,
                        "Farewell in reply, closing session"
                    );
                    tokio::time::sleep(self.config.grace_delay).await;
                    self.end_session(inbound.user.id, kind).await?;
                    return Ok(TurnOutcome::Terminated);
                }

                Ok(TurnOutcome::Replied)
            }
            Err(err) => self.handle_gateway_failure(inbound, session, snapshot, err).await,
        }
    }

    /// End a user's session of a kind: deregister and close its thread.
    ///
    /// Idempotent like the registry. Returns the closed channel, if any.
    /// A failed thread close is logged, never fatal; the session is gone
    /// either way.
    pub async fn end_session(
        &self,
        user: UserId,
        kind: SessionKind,
    ) -> Result<Option<ChannelId>, TurnError> {
        let Some(entry) = self.registry.end(user, kind)? else {
            return Ok(None);
        };
        if let Err(err) = self.transport.close_thread(entry.channel).await {
            tracing::warn!(
                channel = %entry.channel,
                error = %err,
                "Failed to close thread"
            );
        }
        Ok(Some(entry.channel))
    }

    async fn handle_gateway_failure(
        &self,
        inbound: &InboundMessage,
        mut session: tokio::sync::MutexGuard<'_, crate::session::Session>,
        snapshot: crate::session::SessionSnapshot,
        err: GatewayError,
    ) -> Result<TurnOutcome, TurnError> {
        tracing::error!(
            user = %inbound.user.id,
            error = %err,
            "Completion failed, rolling back user turn"
        );
        session.restore(snapshot).await?;
        drop(session);
        self.transport
            .send(inbound.channel, notices::GENERATION_FAILED)
            .await?;
        Ok(TurnOutcome::Failed)
    }

    fn is_farewell(&self, reply: &str) -> bool {
        self.config
            .termination_keywords
            .iter()
            .any(|keyword| reply.contains(keyword.as_str()))
    }
}
