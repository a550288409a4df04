//! Kotoba Gateway - completion backends for the kotoba chat bot.
//!
//! This crate provides:
//! - An OpenAI-compatible chat-completions client with error classification
//! - A bounded-retry decorator for rate limits and transient failures
//! - A canned gateway for debug runs that never touches the network

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod canned;
pub mod openai;
pub mod retry;

pub use canned::CannedGateway;
pub use openai::OpenAIGateway;
pub use retry::{RetryConfig, RetryingGateway};
