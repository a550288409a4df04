//! Kotoba Core - Conversation engine for the kotoba chat bot.
//!
//! This crate provides:
//! - Chat message and participant types
//! - Token budgeting against a model's context accounting
//! - Character catalog loading (persona prompts, greetings, example turns)
//! - Conversation sessions with bounded history and durable transcript logs
//! - An active-session registry (one live session per user and session kind)
//! - The turn controller that drives a full user turn end to end
//! - Contracts for the completion gateway and the thread transport

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod budget;
pub mod character;
pub mod gateway;
pub mod message;
pub mod registry;
pub mod session;
pub mod transport;
pub mod turn;

pub use budget::CountError;
pub use character::{CatalogError, Character, CharacterCatalog, DialogueExample};
pub use gateway::{Completion, CompletionGateway, CompletionRequest, GatewayError, TokenUsage};
pub use message::{ChannelId, ChatMessage, Role, User, UserId};
pub use registry::{ActiveSession, RegistryError, SessionKind, SessionRegistry};
pub use session::{
    LogError, Session, SessionError, SessionLabel, SessionSeed, SessionSnapshot,
    DEFAULT_HISTORY_CAPACITY,
};
pub use transport::{InboundMessage, ThreadTransport, TransportError};
pub use turn::{TurnConfig, TurnController, TurnError, TurnOutcome};
