use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HealbotError, Result};

/// Top-level configuration for the HealBot client.
///
/// Loaded from `~/.healbot/config.toml` by default. Every section falls back
/// to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealbotConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

impl HealbotConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HealbotConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| HealbotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the identity database and downloaded reply audio.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.healbot/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Remote assistant service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base address of the assistant service. Reply audio paths resolve
    /// against it.
    pub base_url: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
        }
    }
}

/// Voice capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Container type attached to finalized recordings.
    pub mime_type: String,
    /// File name used for the multipart upload.
    pub file_name: String,
    /// Fragment size when streaming a recording from a file.
    pub fragment_bytes: usize,
    /// Input device to capture from; "default" picks the system default.
    pub device_name: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            mime_type: "audio/mp3".to_string(),
            file_name: "voice.mp3".to_string(),
            fragment_bytes: 4096,
            device_name: "default".to_string(),
        }
    }
}

/// Conversation wording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Assistant persona named in greetings.
    pub assistant_name: String,
    /// Placeholder shown while a text exchange is in flight.
    pub thinking_text: String,
    /// Placeholder shown while a voice exchange is in flight.
    pub voice_processing_text: String,
    /// Shown in place of the transcript when the service returns none.
    pub voice_fallback_text: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Dr. HealBot".to_string(),
            thinking_text: "Thinking...".to_string(),
            voice_processing_text: "Processing voice message...".to_string(),
            voice_fallback_text: "[Voice message]".to_string(),
        }
    }
}
