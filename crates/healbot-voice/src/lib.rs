//! HealBot voice crate - microphone capture for voice messages.
//!
//! Provides the capture state machine, trait-based microphone access with
//! scoped release, and a recorder that turns captured fragments into a
//! single upload payload. With the `device-audio` feature the system
//! microphone is captured through cpal; mock and file-backed microphones
//! cover tests and machines without audio hardware.

#[cfg(feature = "device-audio")]
pub mod cpal_device;
pub mod device;
pub mod recorder;
pub mod state;

#[cfg(feature = "device-audio")]
pub use cpal_device::CpalMicrophone;
pub use device::{CaptureStream, FileMicrophone, Microphone, MicrophoneLease, MockMicrophone};
pub use recorder::{FinalizedAudio, VoiceRecorder};
pub use state::{CaptureState, StateMachine};
