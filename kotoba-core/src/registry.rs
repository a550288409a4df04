//! Active-session registry.
//!
//! Tracks which users are in a live chat right now, one entry per
//! `(user, session kind)` pair. The registry hands out the per-session
//! async mutex that serializes turns; its own interior lock is a plain
//! `std::sync::Mutex` held only for map operations, never across an await.

use crate::message::{ChannelId, UserId};
use crate::session::Session;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

/// What flavor of chat a session belongs to.
///
/// A user may hold one active session of each kind at a time, but never
/// two of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Persona chat seeded from the character catalog.
    Character,
    /// Self-reflection chat with the built-in listener prompt.
    Reflection,
}

impl SessionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Reflection => "reflection",
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The user already has a live session of this kind. Carries the
    /// existing thread so the caller can redirect there instead of
    /// opening a duplicate.
    #[error("user already has an active {kind} session in channel {channel}")]
    SessionAlreadyActive {
        kind: SessionKind,
        channel: ChannelId,
    },

    #[error("session registry lock poisoned")]
    Poisoned,
}

/// A registered live session and the thread it runs in.
#[derive(Clone)]
pub struct ActiveSession {
    pub channel: ChannelId,
    pub session: Arc<AsyncMutex<Session>>,
}

/// All live sessions, keyed by user and kind.
#[derive(Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<(UserId, SessionKind), ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a user. Rejects a second session of the
    /// same kind, reporting the channel of the existing one.
    pub fn start(
        &self,
        user: UserId,
        kind: SessionKind,
        channel: ChannelId,
        session: Session,
    ) -> Result<Arc<AsyncMutex<Session>>, RegistryError> {
        let mut entries = self.entries.lock().map_err(|_| RegistryError::Poisoned)?;
        if let Some(existing) = entries.get(&(user, kind)) {
            return Err(RegistryError::SessionAlreadyActive {
                kind,
                channel: existing.channel,
            });
        }

        let handle = Arc::new(AsyncMutex::new(session));
        entries.insert(
            (user, kind),
            ActiveSession {
                channel,
                session: Arc::clone(&handle),
            },
        );
        tracing::debug!(user = %user, kind = %kind, channel = %channel, "Session registered");
        Ok(handle)
    }

    /// Look up the user's live session of a kind.
    pub fn lookup(
        &self,
        user: UserId,
        kind: SessionKind,
    ) -> Result<Option<ActiveSession>, RegistryError> {
        let entries = self.entries.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(entries.get(&(user, kind)).cloned())
    }

    /// Find the user's live session running in a specific channel.
    ///
    /// This is the inbound-message router: text in a thread belongs to a
    /// session only when the channel ids match.
    pub fn find_by_channel(
        &self,
        user: UserId,
        channel: ChannelId,
    ) -> Result<Option<(SessionKind, ActiveSession)>, RegistryError> {
        let entries = self.entries.lock().map_err(|_| RegistryError::Poisoned)?;
        Ok(entries
            .iter()
            .find(|((entry_user, _), entry)| *entry_user == user && entry.channel == channel)
            .map(|((_, kind), entry)| (*kind, entry.clone())))
    }

    /// Remove the user's session of a kind. Idempotent: removing an
    /// absent entry returns `None`, not an error.
    pub fn end(
        &self,
        user: UserId,
        kind: SessionKind,
    ) -> Result<Option<ActiveSession>, RegistryError> {
        let mut entries = self.entries.lock().map_err(|_| RegistryError::Poisoned)?;
        let removed = entries.remove(&(user, kind));
        if removed.is_some() {
            tracing::debug!(user = %user, kind = %kind, "Session ended");
        }
        Ok(removed)
    }

    /// Remove every session the user holds, any kind.
    pub fn end_all_for(
        &self,
        user: UserId,
    ) -> Result<Vec<(SessionKind, ActiveSession)>, RegistryError> {
        let mut entries = self.entries.lock().map_err(|_| RegistryError::Poisoned)?;
        let keys: Vec<(UserId, SessionKind)> = entries
            .keys()
            .filter(|(entry_user, _)| *entry_user == user)
            .copied()
            .collect();
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = entries.remove(&key) {
                removed.push((key.1, entry));
            }
        }
        Ok(removed)
    }

    /// Number of live sessions across all users.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
