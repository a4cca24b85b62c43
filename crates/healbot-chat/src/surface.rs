//! Capabilities the orchestrator renders through.
//!
//! [`UiSurface`] stands in for whatever displays the conversation, and
//! [`AudioPlayer`] for reply audio playback. Recording implementations are
//! provided for tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use healbot_client::Url;
use healbot_core::error::HealbotError;
use healbot_core::types::Message;

/// Rendering surface for the conversation widget.
pub trait UiSurface: Send + Sync {
    fn append_message(&self, message: &Message);

    /// Re-render an entry whose placeholder settled.
    fn update_message(&self, message: &Message);

    fn clear_messages(&self);

    /// Ask who the patient is, optionally pre-filling a name.
    fn show_identity_modal(&self, prefill: Option<&str>);

    fn hide_identity_modal(&self);

    fn set_recording_indicator(&self, active: bool);

    fn show_patient_name(&self, name: &str);

    fn scroll_to_latest(&self);

    /// Blocking notice outside the conversation log.
    fn alert(&self, text: &str);
}

/// Plays synthesized reply audio.
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Start playback of `url`. Implementations return once playback has
    /// begun, not when it ends.
    async fn play(&self, url: &Url) -> Result<(), HealbotError>;
}

// =============================================================================
// Recording implementations
// =============================================================================

/// One call made on a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Append(Message),
    Update(Message),
    Clear,
    ShowModal(Option<String>),
    HideModal,
    RecordingIndicator(bool),
    PatientName(String),
    Scroll,
    Alert(String),
}

/// Surface that records every call, for asserting on what was shown.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    fn events_mut(&self) -> MutexGuard<'_, Vec<SurfaceEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, event: SurfaceEvent) {
        self.events_mut().push(event);
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events_mut().clone()
    }

    /// Entries currently on screen, rebuilt from the recorded calls.
    pub fn rendered(&self) -> Vec<Message> {
        let mut shown: Vec<Message> = Vec::new();
        for event in self.events_mut().iter() {
            match event {
                SurfaceEvent::Append(m) => shown.push(m.clone()),
                SurfaceEvent::Update(m) => {
                    if let Some(slot) = shown.iter_mut().find(|s| s.id == m.id) {
                        *slot = m.clone();
                    }
                }
                SurfaceEvent::Clear => shown.clear(),
                _ => {}
            }
        }
        shown
    }

    pub fn alerts(&self) -> Vec<String> {
        self.events_mut()
            .iter()
            .filter_map(|e| match e {
                SurfaceEvent::Alert(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether the identity modal is showing after the last modal call.
    pub fn modal_visible(&self) -> bool {
        self.events_mut()
            .iter()
            .rev()
            .find_map(|e| match e {
                SurfaceEvent::ShowModal(_) => Some(true),
                SurfaceEvent::HideModal => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn recording_indicator(&self) -> bool {
        self.events_mut()
            .iter()
            .rev()
            .find_map(|e| match e {
                SurfaceEvent::RecordingIndicator(on) => Some(*on),
                _ => None,
            })
            .unwrap_or(false)
    }
}

impl UiSurface for RecordingSurface {
    fn append_message(&self, message: &Message) {
        self.record(SurfaceEvent::Append(message.clone()));
    }

    fn update_message(&self, message: &Message) {
        self.record(SurfaceEvent::Update(message.clone()));
    }

    fn clear_messages(&self) {
        self.record(SurfaceEvent::Clear);
    }

    fn show_identity_modal(&self, prefill: Option<&str>) {
        self.record(SurfaceEvent::ShowModal(prefill.map(str::to_string)));
    }

    fn hide_identity_modal(&self) {
        self.record(SurfaceEvent::HideModal);
    }

    fn set_recording_indicator(&self, active: bool) {
        self.record(SurfaceEvent::RecordingIndicator(active));
    }

    fn show_patient_name(&self, name: &str) {
        self.record(SurfaceEvent::PatientName(name.to_string()));
    }

    fn scroll_to_latest(&self) {
        self.record(SurfaceEvent::Scroll);
    }

    fn alert(&self, text: &str) {
        self.record(SurfaceEvent::Alert(text.to_string()));
    }
}

/// Player that records requested URLs and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingPlayer {
    played: Mutex<Vec<Url>>,
    failing: AtomicBool,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<Url> {
        self.played.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, url: &Url) -> Result<(), HealbotError> {
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(HealbotError::DeviceUnavailable(
                "audio output unavailable".to_string(),
            ));
        }
        Ok(())
    }
}
