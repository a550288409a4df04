//! Kotoba Bot - console entry point.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

mod config;
mod console;
mod logging;
mod service;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use config::Config;
use console::{ConsoleTransport, LOBBY};
use kotoba_core::character::CharacterCatalog;
use kotoba_core::gateway::CompletionGateway;
use kotoba_core::message::{User, UserId};
use kotoba_core::registry::SessionRegistry;
use kotoba_core::transport::{InboundMessage, ThreadTransport};
use kotoba_core::turn::TurnController;
use kotoba_gateway::{CannedGateway, OpenAIGateway, RetryingGateway};
use service::{ChatService, ServiceSettings};

/// Kotoba - character chat sessions over a console channel.
#[derive(Parser, Debug)]
#[command(name = "kotoba-bot")]
#[command(version)]
#[command(about = "Character chat bot with token-budgeted sessions", long_about = None)]
struct Cli {
    /// Path to the config file (default: ./kotoba.toml, then the user config dir)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Answer from the canned gateway instead of calling the API
    #[arg(long)]
    debug: bool,

    /// Override the configured log level
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init_logging(log_level, &config.observability.log_format);

    tracing::info!("Kotoba Bot v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Arc::new(CharacterCatalog::load(&config.characters.index_path())?);
    tracing::info!(characters = catalog.len(), "Character catalog loaded");

    let registry = Arc::new(SessionRegistry::new());
    let transport = Arc::new(ConsoleTransport::new());

    let gateway: Arc<dyn CompletionGateway> = if cli.debug {
        tracing::info!("Debug mode, replies come from the canned gateway");
        Arc::new(CannedGateway::new(config.chat.termination_keywords.clone()))
    } else {
        let api_key = config.api_key()?;
        let openai = OpenAIGateway::with_base_url(&api_key, config.gateway.base_url.clone())?;
        Arc::new(RetryingGateway::new(Arc::new(openai), config.retry_config()))
    };

    let controller = Arc::new(TurnController::new(
        Arc::clone(&registry),
        gateway,
        Arc::clone(&transport) as Arc<dyn ThreadTransport>,
        config.turn_config(),
    ));

    let settings = ServiceSettings {
        history_capacity: config.session.history_capacity,
        log_dir: config.session.log_dir(),
        resume: config.session.resume,
        reflection_prompt: config.chat.reflection_prompt.clone(),
    };
    let service = ChatService::new(
        catalog,
        Arc::clone(&registry),
        controller,
        Arc::clone(&transport) as Arc<dyn ThreadTransport>,
        settings,
    );

    run_console(&service, &transport).await
}

/// Drive the console until EOF, `/quit` or ctrl-c.
///
/// Slash commands are answered in the lobby; plain lines go to the most
/// recently opened thread, which is how a thread-capable frontend would
/// route them by channel id.
async fn run_console(service: &ChatService, transport: &Arc<ConsoleTransport>) -> Result<()> {
    let operator = User::new(UserId(1), "console");
    println!("指令:/chat <角色>、/reflect、/characters、/end。/quit 離開。");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = next else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" || text == "/exit" {
            break;
        }

        let channel = if text.starts_with('/') {
            LOBBY
        } else {
            transport.latest_open().unwrap_or(LOBBY)
        };
        let inbound = InboundMessage {
            user: operator.clone(),
            channel,
            text: text.to_string(),
        };
        if let Err(err) = service.dispatch(&inbound).await {
            tracing::error!(error = %err, "Dispatch failed");
        }
    }

    tracing::info!("Console closed");
    Ok(())
}
