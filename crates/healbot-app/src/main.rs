//! HealBot terminal client - composition root.
//!
//! Ties the HealBot crates into a single executable:
//! 1. Parse CLI args and load configuration from TOML
//! 2. Open the identity database
//! 3. Connect to the assistant service
//! 4. Drive the conversation orchestrator from stdin commands

mod cli;
mod commands;
mod input;
#[cfg(not(feature = "device-audio"))]
mod player;
#[cfg(feature = "device-audio")]
mod speaker;
mod terminal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use healbot_chat::{AudioPlayer, ConversationOrchestrator, UiSurface};
use healbot_client::{HttpServiceClient, RemoteService};
use healbot_core::config::HealbotConfig;
use healbot_storage::{Database, IdentityStore, SqliteIdentityStore};

use cli::CliArgs;
use commands::{Command, HELP};
use input::VoiceInput;
use terminal::TerminalSurface;

/// Resolve `~` in the configured data directory.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Speakers when built with an audio device, otherwise a download folder.
#[cfg(feature = "device-audio")]
fn reply_player(_data_dir: &Path) -> Arc<dyn AudioPlayer> {
    Arc::new(speaker::RodioPlayer::new(reqwest::Client::new()))
}

#[cfg(not(feature = "device-audio"))]
fn reply_player(data_dir: &Path) -> Arc<dyn AudioPlayer> {
    Arc::new(player::DownloadPlayer::new(
        reqwest::Client::new(),
        data_dir.join("audio"),
    ))
}

/// Dispatch one line of input. Returns `false` when the user asked to exit.
async fn handle(
    command: Command,
    chat: &ConversationOrchestrator,
    input: &VoiceInput,
    surface: &TerminalSurface,
) -> bool {
    // Identity and microphone failures are alerted by the orchestrator itself.
    let self_alerting = matches!(
        command,
        Command::New(_) | Command::Load(_) | Command::Record(_)
    );
    let result = match command {
        Command::Empty => Ok(()),
        Command::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Command::Unknown(line) => {
            surface.alert(&format!("Unknown command: {} (try /help)", line));
            Ok(())
        }
        Command::New(name) => chat.start_new(&name).await.map(|_| ()),
        Command::Load(name) => chat.load_previous(&name).await.map(|_| ()),
        Command::Say(text) => chat.send_text(&text).await.map(|_| ()),
        Command::Record(path) => match input.prepare(path.as_deref()) {
            Ok(()) => chat.start_recording().await,
            Err(usage) => {
                surface.alert(usage);
                Ok(())
            }
        },
        Command::Stop => chat.stop_recording().await.map(|_| ()),
        Command::Cancel => chat.cancel_recording(),
        Command::Save => chat.save_transcript().await.map(|message| {
            println!("{}", message);
        }),
        Command::Sessions => chat.saved_transcripts().await.map(|names| {
            if names.is_empty() {
                println!("No saved transcripts.");
            }
            for name in names {
                println!("  {}", name);
            }
        }),
        Command::Forget => chat.discard_session().await,
        Command::Close => chat.close().await.map(|_| ()),
        Command::Quit => {
            if let Err(e) = chat.close().await {
                tracing::warn!(error = %e, "Failed to close cleanly");
            }
            return false;
        }
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "Command failed");
        if !self_alerting {
            surface.alert(&e.to_string());
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = HealbotConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting HealBot v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    let db = Arc::new(Database::new(&data_dir.join("identity.db"))?);
    let identity: Arc<dyn IdentityStore> = Arc::new(SqliteIdentityStore::new(db));

    // Service.
    let service: Arc<dyn RemoteService> =
        Arc::new(HttpServiceClient::new(&config.service.base_url)?);
    match service.health().await {
        Ok(status) => tracing::info!(
            base_url = %config.service.base_url,
            message = %status.message,
            "Assistant service reachable"
        ),
        Err(e) => tracing::warn!(
            base_url = %config.service.base_url,
            error = %e,
            "Assistant service unreachable"
        ),
    }

    // Capabilities.
    let input = VoiceInput::select(args.file_input, &mut config);
    let surface = Arc::new(TerminalSurface::new(config.chat.assistant_name.clone()));
    let player = reply_player(&data_dir);
    tracing::info!(input = ?input, "Voice input selected");

    let chat = ConversationOrchestrator::new(
        &config,
        service,
        identity,
        input.microphone(),
        Arc::clone(&surface) as Arc<dyn UiSurface>,
        player,
    );

    match (&args.patient, args.resume) {
        (Some(name), true) => {
            handle(Command::Load(name.clone()), &chat, &input, &surface).await;
        }
        (Some(name), false) => {
            handle(Command::New(name.clone()), &chat, &input, &surface).await;
        }
        (None, _) => chat.open(),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !handle(Command::parse(&line), &chat, &input, &surface).await {
            break;
        }
    }

    tracing::info!("HealBot shutting down");
    Ok(())
}
