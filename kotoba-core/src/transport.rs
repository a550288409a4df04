//! Thread transport contract.
//!
//! A transport owns the wire side of chat: it opens per-user threads,
//! delivers text into them, and tears them down. The console adapter in
//! `kotoba-bot` implements this; a Discord adapter would too.

use crate::message::{ChannelId, User};
use async_trait::async_trait;
use thiserror::Error;

/// Error from a thread transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel {0} not found")]
    ChannelNotFound(ChannelId),

    #[error("transport send failed: {0}")]
    SendFailed(String),

    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// An inbound user utterance as reported by the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user: User,
    pub channel: ChannelId,
    pub text: String,
}

/// Outward chat surface the conversation engine drives.
#[async_trait]
pub trait ThreadTransport: Send + Sync {
    /// Open a dedicated chat thread for a user, returning its channel id.
    async fn open_thread(&self, user: &User, title: &str) -> Result<ChannelId, TransportError>;

    /// Deliver text into a thread.
    async fn send(&self, channel: ChannelId, text: &str) -> Result<(), TransportError>;

    /// Close a thread. Closing one that is already gone is not an error.
    async fn close_thread(&self, channel: ChannelId) -> Result<(), TransportError>;
}
