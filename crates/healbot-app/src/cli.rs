//! CLI argument definitions for the HealBot terminal client.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

use healbot_core::config::HealbotConfig;

/// HealBot - talk to your health assistant by text or voice from the terminal.
#[derive(Parser, Debug)]
#[command(name = "healbot", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Base address of the assistant service.
    #[arg(short = 'u', long = "base-url")]
    pub base_url: Option<String>,

    /// Data directory for the identity database and downloaded audio.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Patient name to start with instead of prompting.
    #[arg(short = 'p', long = "patient")]
    pub patient: Option<String>,

    /// Resume the patient's previous session instead of starting a new one.
    #[arg(long = "resume", requires = "patient")]
    pub resume: bool,

    /// Record voice messages from audio files instead of the microphone.
    #[arg(long = "file-input")]
    pub file_input: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > HEALBOT_CONFIG env var > ~/.healbot/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("HEALBOT_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the service address.
    ///
    /// Priority: --base-url flag > HEALBOT_BASE_URL env var > config file value.
    pub fn resolve_base_url(&self, config_base_url: &str) -> String {
        pick(
            self.base_url.clone(),
            std::env::var("HEALBOT_BASE_URL").ok(),
            config_base_url,
        )
    }

    /// Fold CLI and environment overrides into the loaded configuration.
    pub fn apply(&self, config: &mut HealbotConfig) {
        config.service.base_url = self.resolve_base_url(&config.service.base_url);
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }
    }
}

/// First non-empty value among flag, environment and config.
fn pick(flag: Option<String>, env: Option<String>, config: &str) -> String {
    flag.filter(|v| !v.trim().is_empty())
        .or_else(|| env.filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| config.to_string())
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".healbot").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".healbot").join("config.toml");
    }
    PathBuf::from("config.toml")
}
