//! Voice input selection for the terminal client.

use std::path::Path;
use std::sync::Arc;

use healbot_core::config::HealbotConfig;
#[cfg(feature = "device-audio")]
use healbot_voice::cpal_device::{WAV_FILE_NAME, WAV_MIME_TYPE};
#[cfg(feature = "device-audio")]
use healbot_voice::CpalMicrophone;
use healbot_voice::{FileMicrophone, Microphone};

const FILE_REQUIRED: &str = "Usage: /record <audio-file>";
#[cfg(feature = "device-audio")]
const FILE_UNSUPPORTED: &str =
    "Recording uses the microphone. Start with --file-input to record from files.";

/// Where voice messages are captured from.
#[derive(Debug, Clone)]
pub enum VoiceInput {
    #[cfg(feature = "device-audio")]
    Device(Arc<CpalMicrophone>),
    File(Arc<FileMicrophone>),
}

impl VoiceInput {
    /// Pick the capture source. The microphone also fixes the upload
    /// container to WAV.
    #[cfg(feature = "device-audio")]
    pub fn select(file_input: bool, config: &mut HealbotConfig) -> Self {
        if file_input {
            return Self::from_files(config);
        }
        config.voice.mime_type = WAV_MIME_TYPE.to_string();
        config.voice.file_name = WAV_FILE_NAME.to_string();
        VoiceInput::Device(Arc::new(CpalMicrophone::new(
            config.voice.device_name.clone(),
        )))
    }

    #[cfg(not(feature = "device-audio"))]
    pub fn select(_file_input: bool, config: &mut HealbotConfig) -> Self {
        Self::from_files(config)
    }

    fn from_files(config: &HealbotConfig) -> Self {
        VoiceInput::File(Arc::new(FileMicrophone::new(config.voice.fragment_bytes)))
    }

    pub fn microphone(&self) -> Arc<dyn Microphone> {
        match self {
            #[cfg(feature = "device-audio")]
            VoiceInput::Device(mic) => Arc::clone(mic) as Arc<dyn Microphone>,
            VoiceInput::File(mic) => Arc::clone(mic) as Arc<dyn Microphone>,
        }
    }

    /// Get ready for a `/record` command. The error is shown to the user.
    pub fn prepare(&self, path: Option<&Path>) -> Result<(), &'static str> {
        match (self, path) {
            #[cfg(feature = "device-audio")]
            (VoiceInput::Device(_), None) => Ok(()),
            #[cfg(feature = "device-audio")]
            (VoiceInput::Device(_), Some(_)) => Err(FILE_UNSUPPORTED),
            (VoiceInput::File(mic), Some(path)) => {
                mic.set_source(path);
                Ok(())
            }
            (VoiceInput::File(_), None) => Err(FILE_REQUIRED),
        }
    }
}
