//! Conversation sessions.
//!
//! A session is one user's live exchange with one persona: a single system
//! message, a bounded sliding window of turns, and a durable transcript
//! artifact that is atomically rewritten after every mutation. The prompt
//! sent to the model is always `[system] + history`; assembling one without
//! a system message is an error, never a silent omission.

pub mod log;

pub use log::LogError;

use crate::character::{Character, DialogueExample};
use crate::message::{ChatMessage, UserId};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Default bound on the history window, in messages.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Error from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already has a system message")]
    AlreadyInitialized,

    #[error("session has no system message")]
    SystemMessageMissing,

    #[error(transparent)]
    Log(#[from] LogError),
}

/// Unique session identifier; doubles as the transcript file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionLabel(String);

impl SessionLabel {
    /// Label for a character chat: `{user}-{character}-{timestamp}`.
    pub fn for_character(user: UserId, character_id: &str, started_at: DateTime<Local>) -> Self {
        Self(format!(
            "{user}-{character_id}-{}",
            started_at.format("%Y%m%d-%H%M%S")
        ))
    }

    /// Random label for sessions without a persona.
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Rebuild a label from a transcript file stem, for resuming a
    /// session found on disk.
    pub fn from_file_stem(stem: impl Into<String>) -> Self {
        Self(stem.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the transcript artifact for this session.
    pub fn log_file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to seed a fresh session.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub system_prompt: String,
    pub examples: Vec<DialogueExample>,
    pub label: SessionLabel,
}

impl SessionSeed {
    /// Seed from a catalog character.
    pub fn from_character(
        character: &Character,
        user: UserId,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            system_prompt: character.system_prompt.clone(),
            examples: character.examples.clone(),
            label: SessionLabel::for_character(user, &character.id, started_at),
        }
    }

    /// Seed with a bare system prompt, no example turns, random label.
    pub fn plain(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            examples: Vec::new(),
            label: SessionLabel::random(),
        }
    }
}

/// Opaque rollback point for the turn controller.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    history: VecDeque<ChatMessage>,
}

/// A live conversation with bounded history and a durable transcript.
#[derive(Debug)]
pub struct Session {
    system_message: Option<ChatMessage>,
    history: VecDeque<ChatMessage>,
    capacity: usize,
    label: SessionLabel,
    log_path: PathBuf,
}

impl Session {
    /// Create an uninitialized session. A system message must be set
    /// before any turn may run.
    pub fn new(label: SessionLabel, log_dir: &Path, capacity: usize) -> Self {
        let log_path = log_dir.join(label.log_file_name());
        Self {
            system_message: None,
            history: VecDeque::new(),
            capacity: capacity.max(1),
            label,
            log_path,
        }
    }

    /// Create a session from a seed: system prompt set, example turns
    /// pushed into history in order.
    pub fn from_seed(seed: SessionSeed, log_dir: &Path, capacity: usize) -> Self {
        let mut session = Self::new(seed.label, log_dir, capacity);
        session.system_message = Some(ChatMessage::system(seed.system_prompt));
        for example in seed.examples {
            session.push_evicting(ChatMessage::user(example.user));
            session.push_evicting(ChatMessage::assistant(example.assistant));
        }
        session
    }

    /// Rebuild a session from a transcript read back from disk.
    ///
    /// Keeps the most recent `capacity` history entries. The transcript
    /// must start with a system message.
    pub fn resume(
        transcript: Vec<ChatMessage>,
        label: SessionLabel,
        log_dir: &Path,
        capacity: usize,
    ) -> Result<Self, SessionError> {
        let mut iter = transcript.into_iter();
        let system = match iter.next() {
            Some(msg) if msg.role == crate::message::Role::System => msg,
            _ => return Err(SessionError::SystemMessageMissing),
        };

        let mut session = Self::new(label, log_dir, capacity);
        session.system_message = Some(system);
        for msg in iter {
            session.push_evicting(msg);
        }
        Ok(session)
    }

    /// Set the system message. Fails if one is already set.
    pub fn init_system_message(&mut self, text: impl Into<String>) -> Result<(), SessionError> {
        if self.system_message.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }
        self.system_message = Some(ChatMessage::system(text));
        Ok(())
    }

    /// Append a user turn, persist, and return the assembled prompt.
    pub async fn prepare_user_turn(
        &mut self,
        text: impl Into<String>,
    ) -> Result<Vec<ChatMessage>, SessionError> {
        if self.system_message.is_none() {
            return Err(SessionError::SystemMessageMissing);
        }
        self.push_evicting(ChatMessage::user(text));
        self.persist().await?;
        Ok(self.messages())
    }

    /// Append an assistant turn and persist.
    pub async fn append_assistant_turn(
        &mut self,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        if self.system_message.is_none() {
            return Err(SessionError::SystemMessageMissing);
        }
        self.push_evicting(ChatMessage::assistant(text));
        self.persist().await
    }

    /// Prompt token cost over `[system] + history` for `model`.
    pub fn token_len(&self, model: &str) -> Result<usize, crate::budget::CountError> {
        crate::budget::count_tokens(&self.messages(), model)
    }

    /// Capture a rollback point covering the history window.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            history: self.history.clone(),
        }
    }

    /// Restore a snapshot and persist, so the artifact matches memory again.
    pub async fn restore(&mut self, snapshot: SessionSnapshot) -> Result<(), SessionError> {
        self.history = snapshot.history;
        self.persist().await
    }

    /// Full transcript: system message first, then the history window.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.history.len() + 1);
        if let Some(system) = &self.system_message {
            out.push(system.clone());
        }
        out.extend(self.history.iter().cloned());
        out
    }

    pub fn label(&self) -> &SessionLabel {
        &self.label
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.system_message.is_some()
    }

    fn push_evicting(&mut self, message: ChatMessage) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(message);
    }

    async fn persist(&self) -> Result<(), SessionError> {
        log::write_transcript(&self.log_path, &self.messages()).await?;
        tracing::debug!(
            label = %self.label,
            messages = self.history.len(),
            "Transcript persisted"
        );
        Ok(())
    }
}
