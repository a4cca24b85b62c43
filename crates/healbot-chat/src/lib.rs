//! Conversation layer for HealBot.
//!
//! Owns the live session identifier, the conversation log, and the
//! orchestration of text and voice exchanges against the remote service.
//! Rendering and playback go through the `UiSurface` and `AudioPlayer`
//! capabilities.

pub mod error;
pub mod log;
pub mod orchestrator;
pub mod session;
pub mod surface;

pub use error::ChatError;
pub use log::ConversationLog;
pub use orchestrator::ConversationOrchestrator;
pub use session::{Binding, Epoch, ResumeSlot, SessionManager};
pub use surface::{AudioPlayer, RecordingPlayer, RecordingSurface, SurfaceEvent, UiSurface};
