//! Token budgeting for chat prompts.
//!
//! Counts prompt cost the way the chat-completion endpoint bills it: a fixed
//! per-message framing overhead plus the BPE token length of each message
//! body, plus a reply-priming constant. The count must be exact, not an
//! estimate, because the turn controller uses it as a hard cutoff before
//! spending an API call.

use crate::message::ChatMessage;
use once_cell::sync::Lazy;
use thiserror::Error;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

/// Fixed framing cost billed per message (role + delimiters).
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Fixed cost billed for priming the assistant reply.
const REPLY_PRIMING_TOKENS: usize = 2;

/// Error from token counting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CountError {
    /// Model id is not in the supported table.
    #[error("unsupported model for token counting: {model}")]
    UnsupportedModel { model: String },

    /// Encoder data failed to load.
    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),
}

/// BPE vocabulary family a model tokenizes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Cl100k,
    O200k,
}

/// Supported chat models: id, encoding family, context window in tokens.
const MODELS: &[(&str, Encoding, usize)] = &[
    ("gpt-3.5-turbo", Encoding::Cl100k, 4_096),
    ("gpt-3.5-turbo-16k", Encoding::Cl100k, 16_384),
    ("gpt-4", Encoding::Cl100k, 8_192),
    ("gpt-4-turbo", Encoding::Cl100k, 128_000),
    ("gpt-4o", Encoding::O200k, 128_000),
    ("gpt-4o-mini", Encoding::O200k, 128_000),
];

// Encoder construction parses the embedded vocabulary, so build each family
// once and share it process-wide.
static CL100K: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| cl100k_base().map_err(|e| e.to_string()));
static O200K: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| o200k_base().map_err(|e| e.to_string()));

fn lookup(model: &str) -> Option<(Encoding, usize)> {
    MODELS
        .iter()
        .find(|(id, _, _)| *id == model)
        .map(|(_, enc, window)| (*enc, *window))
}

fn encoder(encoding: Encoding) -> Result<&'static CoreBPE, CountError> {
    let cached = match encoding {
        Encoding::Cl100k => &CL100K,
        Encoding::O200k => &O200K,
    };
    cached
        .as_ref()
        .map_err(|e| CountError::Tokenizer(e.clone()))
}

/// Count the prompt cost of `messages` for `model`.
///
/// Per message: [`MESSAGE_OVERHEAD_TOKENS`] plus the BPE length of the
/// content. The sum is topped with [`REPLY_PRIMING_TOKENS`], so an empty
/// prompt still costs 2. Deterministic for identical input.
pub fn count_tokens(messages: &[ChatMessage], model: &str) -> Result<usize, CountError> {
    let (encoding, _) = lookup(model).ok_or_else(|| CountError::UnsupportedModel {
        model: model.to_string(),
    })?;
    let bpe = encoder(encoding)?;

    let mut total = REPLY_PRIMING_TOKENS;
    for message in messages {
        total += MESSAGE_OVERHEAD_TOKENS;
        total += bpe.encode_with_special_tokens(&message.content).len();
    }
    Ok(total)
}

/// Context window in tokens for a supported model, `None` otherwise.
pub fn context_window(model: &str) -> Option<usize> {
    lookup(model).map(|(_, window)| window)
}

/// Whether `model` is in the supported table.
pub fn is_supported(model: &str) -> bool {
    lookup(model).is_some()
}

/// Ids of all supported models, table order.
pub fn supported_models() -> Vec<&'static str> {
    MODELS.iter().map(|(id, _, _)| *id).collect()
}
