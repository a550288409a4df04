//! Chat service: command routing and session lifecycle.
//!
//! Parses the user-facing commands (`/chat`, `/reflect`, `/end`,
//! `/characters`) and relays everything else to the turn controller.
//! Starting a chat opens a thread, seeds a session from the catalog (or
//! resumes the newest transcript on disk) and registers it; a second
//! `/chat` while one is live redirects to the existing thread instead of
//! opening a duplicate.

use anyhow::Result;
use chrono::Local;
use kotoba_core::character::{Character, CharacterCatalog};
use kotoba_core::message::{ChannelId, UserId};
use kotoba_core::registry::{RegistryError, SessionKind, SessionRegistry};
use kotoba_core::session::log::read_transcript;
use kotoba_core::session::{Session, SessionLabel, SessionSeed};
use kotoba_core::transport::{InboundMessage, ThreadTransport};
use kotoba_core::turn::{TurnController, TurnOutcome};
use std::path::PathBuf;
use std::sync::Arc;

const CHAT_USAGE: &str = "請指定角色，例如:/chat aki。輸入 /characters 查看可用角色。";
const NO_ACTIVE_SESSION: &str = "目前沒有進行中的對話。";
const UNROUTED_HINT: &str = "目前沒有進行中的對話。輸入 /chat <角色> 開始聊天。";
const REFLECTION_GREETING: &str = "今天想聊聊什麼呢?我在聽。";
const RESUMED_NOTICE: &str = "(已接續上次的對話。)";

fn already_active_notice(channel: ChannelId) -> String {
    format!("你已經有一個進行中的對話(#{channel}),請先 /end 結束,或直接在那裡繼續。")
}

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// `/chat <character_id>`
    Chat { character: &'a str },
    /// `/reflect`
    Reflect,
    /// `/end`
    End,
    /// `/characters`
    Characters,
    /// Anything else: a chat turn for a live thread.
    Plain(&'a str),
}

/// Split a line into a command. Unknown slash words fall through to
/// [`Command::Plain`] so the turn controller can reject them by routing.
pub fn parse_command(line: &str) -> Command<'_> {
    let trimmed = line.trim();
    let (head, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (trimmed, ""),
    };
    match head {
        "/chat" => Command::Chat { character: rest },
        "/reflect" => Command::Reflect,
        "/end" => Command::End,
        "/characters" => Command::Characters,
        _ => Command::Plain(trimmed),
    }
}

/// Session-related knobs the service needs from the config.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub history_capacity: usize,
    pub log_dir: PathBuf,
    pub resume: bool,
    pub reflection_prompt: String,
}

/// Routes commands and drives session starts and ends.
pub struct ChatService {
    catalog: Arc<CharacterCatalog>,
    registry: Arc<SessionRegistry>,
    controller: Arc<TurnController>,
    transport: Arc<dyn ThreadTransport>,
    settings: ServiceSettings,
}

impl ChatService {
    pub fn new(
        catalog: Arc<CharacterCatalog>,
        registry: Arc<SessionRegistry>,
        controller: Arc<TurnController>,
        transport: Arc<dyn ThreadTransport>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            catalog,
            registry,
            controller,
            transport,
            settings,
        }
    }

    /// Handle one inbound line, command or chat turn.
    pub async fn dispatch(&self, inbound: &InboundMessage) -> Result<()> {
        match parse_command(&inbound.text) {
            Command::Chat { character } => self.start_character_chat(inbound, character).await,
            Command::Reflect => self.start_reflection(inbound).await,
            Command::End => self.end_from(inbound).await,
            Command::Characters => self.list_characters(inbound).await,
            Command::Plain(_) => self.relay(inbound).await,
        }
    }

    async fn start_character_chat(&self, inbound: &InboundMessage, id: &str) -> Result<()> {
        if id.is_empty() {
            self.transport.send(inbound.channel, CHAT_USAGE).await?;
            return Ok(());
        }
        let Some(character) = self.catalog.get(id) else {
            let notice = format!(
                "沒有這個角色:{id}。可用角色:{}",
                self.catalog.ids().join("、")
            );
            self.transport.send(inbound.channel, &notice).await?;
            return Ok(());
        };

        if let Some(existing) = self
            .registry
            .lookup(inbound.user.id, SessionKind::Character)?
        {
            self.transport
                .send(inbound.channel, &already_active_notice(existing.channel))
                .await?;
            return Ok(());
        }

        let mut resumed = false;
        let session = if self.settings.resume {
            match self.try_resume(inbound.user.id, &character).await {
                Some(session) => {
                    resumed = true;
                    session
                }
                None => self.fresh_character_session(inbound.user.id, &character),
            }
        } else {
            self.fresh_character_session(inbound.user.id, &character)
        };

        let title = format!("{} 與{}的聊天室", inbound.user.name, character.name);
        let thread = self.transport.open_thread(&inbound.user, &title).await?;

        match self
            .registry
            .start(inbound.user.id, SessionKind::Character, thread, session)
        {
            Ok(_) => {}
            Err(RegistryError::SessionAlreadyActive { channel, .. }) => {
                // Lost a start race; fold back to the surviving thread.
                self.transport.close_thread(thread).await?;
                self.transport
                    .send(inbound.channel, &already_active_notice(channel))
                    .await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.transport.send(thread, &character.greeting).await?;
        if resumed {
            self.transport.send(thread, RESUMED_NOTICE).await?;
        }
        tracing::info!(
            user = %inbound.user.id,
            character = %character.id,
            channel = %thread,
            resumed,
            "Character chat started"
        );
        Ok(())
    }

    async fn start_reflection(&self, inbound: &InboundMessage) -> Result<()> {
        if let Some(existing) = self
            .registry
            .lookup(inbound.user.id, SessionKind::Reflection)?
        {
            self.transport
                .send(inbound.channel, &already_active_notice(existing.channel))
                .await?;
            return Ok(());
        }

        let seed = SessionSeed::plain(self.settings.reflection_prompt.clone());
        let session = Session::from_seed(seed, &self.settings.log_dir, self.settings.history_capacity);

        let title = format!("{} 的自我對話", inbound.user.name);
        let thread = self.transport.open_thread(&inbound.user, &title).await?;

        match self
            .registry
            .start(inbound.user.id, SessionKind::Reflection, thread, session)
        {
            Ok(_) => {}
            Err(RegistryError::SessionAlreadyActive { channel, .. }) => {
                self.transport.close_thread(thread).await?;
                self.transport
                    .send(inbound.channel, &already_active_notice(channel))
                    .await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.transport.send(thread, REFLECTION_GREETING).await?;
        tracing::info!(
            user = %inbound.user.id,
            channel = %thread,
            "Reflection chat started"
        );
        Ok(())
    }

    /// `/end` inside a live thread ends that session; anywhere else it
    /// ends every session the user holds.
    async fn end_from(&self, inbound: &InboundMessage) -> Result<()> {
        if let Some((kind, _)) = self
            .registry
            .find_by_channel(inbound.user.id, inbound.channel)?
        {
            self.controller.end_session(inbound.user.id, kind).await?;
            return Ok(());
        }

        let mut ended = false;
        for kind in [SessionKind::Character, SessionKind::Reflection] {
            if self
                .controller
                .end_session(inbound.user.id, kind)
                .await?
                .is_some()
            {
                ended = true;
            }
        }
        if !ended {
            self.transport.send(inbound.channel, NO_ACTIVE_SESSION).await?;
        }
        Ok(())
    }

    async fn list_characters(&self, inbound: &InboundMessage) -> Result<()> {
        if self.catalog.is_empty() {
            self.transport.send(inbound.channel, "目前沒有任何角色。").await?;
            return Ok(());
        }
        let mut lines = vec!["可用角色:".to_string()];
        for character in self.catalog.iter() {
            lines.push(format!(
                "- {}:{}({})",
                character.id, character.name, character.description
            ));
        }
        self.transport.send(inbound.channel, &lines.join("\n")).await?;
        Ok(())
    }

    async fn relay(&self, inbound: &InboundMessage) -> Result<()> {
        let outcome = self.controller.handle_message(inbound).await?;
        if outcome == TurnOutcome::Unrouted {
            self.transport.send(inbound.channel, UNROUTED_HINT).await?;
        }
        Ok(())
    }

    fn fresh_character_session(&self, user: UserId, character: &Character) -> Session {
        let seed = SessionSeed::from_character(character, user, Local::now());
        Session::from_seed(seed, &self.settings.log_dir, self.settings.history_capacity)
    }

    /// Try to rebuild a session from the newest matching transcript.
    /// Any unreadable or malformed artifact logs a warning and falls back
    /// to a fresh session; resume never takes the bot down.
    async fn try_resume(&self, user: UserId, character: &Character) -> Option<Session> {
        let path = self.latest_transcript(user, &character.id).await?;
        let stem = path.file_stem()?.to_str()?;

        let transcript = match read_transcript(&path).await {
            Ok(transcript) => transcript,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Unreadable transcript, starting fresh"
                );
                return None;
            }
        };

        match Session::resume(
            transcript,
            SessionLabel::from_file_stem(stem),
            &self.settings.log_dir,
            self.settings.history_capacity,
        ) {
            Ok(session) => {
                tracing::info!(
                    user = %user,
                    character = %character.id,
                    transcript = %path.display(),
                    "Resumed session from transcript"
                );
                Some(session)
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Transcript rejected, starting fresh"
                );
                None
            }
        }
    }

    async fn latest_transcript(&self, user: UserId, character_id: &str) -> Option<PathBuf> {
        let prefix = format!("{user}-{character_id}-");
        let mut entries = tokio::fs::read_dir(&self.settings.log_dir).await.ok()?;

        // Timestamped file names sort lexicographically by start time.
        let mut newest: Option<(String, PathBuf)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            if newest.as_ref().is_none_or(|(best, _)| name > *best) {
                newest = Some((name, entry.path()));
            }
        }
        newest.map(|(_, path)| path)
    }
}
