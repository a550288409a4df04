//! Bot configuration.
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file at all) yields a runnable setup.
//!
//! # Search Order
//!
//! 1. `--config <path>` flag (must exist)
//! 2. `./kotoba.toml`
//! 3. `{project config dir}/kotoba.toml`
//! 4. Built-in defaults

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use kotoba_core::budget;
use kotoba_core::turn::TurnConfig;
use kotoba_gateway::RetryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up along the search path.
pub const CONFIG_FILE_NAME: &str = "kotoba.toml";

// ── Top-level config ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub session: SessionConfig,
    pub characters: CharactersConfig,
    pub chat: ChatConfig,
    pub observability: ObservabilityConfig,
}

// ── Gateway ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the OpenAI-compatible API.
    pub base_url: String,
    /// Model requested for completions; must be a known model id.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Reply length cap in tokens.
    pub max_tokens: u32,
    /// Environment variable holding the API key. The key itself never
    /// lives in the config file.
    pub api_key_env: String,
    pub retry: GatewayRetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "gpt-3.5-turbo".into(),
            temperature: 0.9,
            max_tokens: 150,
            api_key_env: "OPENAI_API_KEY".into(),
            retry: GatewayRetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayRetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait between attempts, in seconds.
    pub retry_delay_secs: u64,
}

impl Default for GatewayRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 10,
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// History window bound, in messages.
    pub history_capacity: usize,
    /// Hard prompt budget; a turn beyond it ends the session.
    pub max_prompt_tokens: usize,
    /// Directory for transcript artifacts. `~` is expanded.
    pub log_dir: String,
    /// Resume the newest matching transcript on `/chat` instead of
    /// starting fresh.
    pub resume: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            max_prompt_tokens: 3_500,
            log_dir: "assets/logs".into(),
            resume: false,
        }
    }
}

impl SessionConfig {
    pub fn log_dir(&self) -> PathBuf {
        expand(&self.log_dir)
    }
}

// ── Characters ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CharactersConfig {
    /// Path to the character index file. `~` is expanded.
    pub index: String,
}

impl Default for CharactersConfig {
    fn default() -> Self {
        Self {
            index: "assets/characters/characters.json".into(),
        }
    }
}

impl CharactersConfig {
    pub fn index_path(&self) -> PathBuf {
        expand(&self.index)
    }
}

// ── Chat ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Farewell phrases in a reply that end the session.
    pub termination_keywords: Vec<String>,
    /// Pause between a farewell reply and thread teardown, in seconds.
    pub grace_delay_secs: u64,
    /// System prompt for `/reflect` sessions.
    pub reflection_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            termination_keywords: vec!["掰掰".into(), "再見".into()],
            grace_delay_secs: 3,
            reflection_prompt: "你是一位溫柔的傾聽者，陪伴使用者整理自己的想法和心情。\
                                請用繁體中文回應，語氣溫和，不批判，\
                                並在適當的時候提出一個幫助對方想得更深的問題。"
                .into(),
        }
    }
}

// ── Observability ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Base log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// "pretty" or "json".
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_format: "pretty".into(),
        }
    }
}

// ── Loading and validation ───────────────────────────────────────

impl Config {
    /// Load configuration, walking the search path unless an explicit
    /// path is given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                return Self::load_from(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dirs) = ProjectDirs::from("", "", "kotoba") {
            paths.push(dirs.config_dir().join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Reject configurations the bot cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !budget::is_supported(&self.gateway.model) {
            bail!(
                "unsupported model '{}' (known models: {})",
                self.gateway.model,
                budget::supported_models().join(", ")
            );
        }
        if let Some(window) = budget::context_window(&self.gateway.model) {
            if self.session.max_prompt_tokens >= window {
                bail!(
                    "max_prompt_tokens {} does not fit the {}-token context window of {}",
                    self.session.max_prompt_tokens,
                    window,
                    self.gateway.model
                );
            }
        }
        if self.session.history_capacity == 0 {
            bail!("history_capacity must be at least 1");
        }
        if self.chat.termination_keywords.is_empty() {
            bail!("termination_keywords must not be empty");
        }
        Ok(())
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.gateway.api_key_env).with_context(|| {
            format!(
                "environment variable {} is not set",
                self.gateway.api_key_env
            )
        })
    }

    /// Turn-controller tuning derived from this config.
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            model: self.gateway.model.clone(),
            temperature: self.gateway.temperature,
            max_tokens: self.gateway.max_tokens,
            max_prompt_tokens: self.session.max_prompt_tokens,
            termination_keywords: self.chat.termination_keywords.clone(),
            grace_delay: Duration::from_secs(self.chat.grace_delay_secs),
        }
    }

    /// Gateway retry tuning derived from this config.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.gateway.retry.max_retries,
            retry_delay: Duration::from_secs(self.gateway.retry.retry_delay_secs),
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
