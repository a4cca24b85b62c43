//! Conversation orchestrator: sequences user input, exchanges and rendering.
//!
//! Text path: user entry, pending "thinking" placeholder, exchange, then the
//! placeholder settles into the reply or an error. Voice path: pending
//! "processing" user entry, exchange, then the entry becomes the transcript
//! and the reply is appended. A failed voice exchange appends a separate
//! assistant error entry and leaves the user placeholder pending.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use healbot_client::RemoteService;
use healbot_core::config::{ChatConfig, HealbotConfig};
use healbot_core::error::HealbotError;
use healbot_core::types::{Message, MessageOrigin, MessageStatus, Role, SessionId};
use healbot_storage::IdentityStore;
use healbot_voice::{CaptureState, FinalizedAudio, Microphone, VoiceRecorder};

use crate::error::ChatError;
use crate::log::ConversationLog;
use crate::session::{Binding, Epoch, SessionManager};
use crate::surface::{AudioPlayer, UiSurface};

const NAME_REQUIRED_ALERT: &str = "Please enter your name to continue.";
const MICROPHONE_ALERT: &str = "Unable to access microphone. Please check permissions.";

/// Coordinates sessions, exchanges, voice capture and rendering.
pub struct ConversationOrchestrator {
    config: ChatConfig,
    base_url: String,
    service: Arc<dyn RemoteService>,
    sessions: SessionManager,
    recorder: VoiceRecorder,
    surface: Arc<dyn UiSurface>,
    player: Arc<dyn AudioPlayer>,
    log: Mutex<ConversationLog>,
}

impl std::fmt::Debug for ConversationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("base_url", &self.base_url)
            .field("sessions", &self.sessions)
            .field("recorder", &self.recorder)
            .finish()
    }
}

impl ConversationOrchestrator {
    pub fn new(
        config: &HealbotConfig,
        service: Arc<dyn RemoteService>,
        identity: Arc<dyn IdentityStore>,
        microphone: Arc<dyn Microphone>,
        surface: Arc<dyn UiSurface>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        Self {
            config: config.chat.clone(),
            base_url: config.service.base_url.clone(),
            sessions: SessionManager::new(Arc::clone(&service), identity),
            service,
            recorder: VoiceRecorder::new(microphone, &config.voice),
            surface,
            player,
            log: Mutex::new(ConversationLog::new()),
        }
    }

    fn log(&self) -> Result<MutexGuard<'_, ConversationLog>, HealbotError> {
        self.log
            .lock()
            .map_err(|e| HealbotError::InvalidState(format!("log lock poisoned: {}", e)))
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Show the identity modal, pre-filled with the last saved name.
    pub fn open(&self) {
        let last = self.sessions.last_patient_name().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read saved patient name");
            None
        });
        if let Some(name) = &last {
            debug!(patient = %name, "Loaded saved patient name");
        }
        self.surface.show_identity_modal(last.as_deref());
    }

    /// Start a fresh conversation for `name`.
    pub async fn start_new(&self, name: &str) -> Result<SessionId, ChatError> {
        let binding = self.bind(name)?;
        let id = self.create_or_alert(&binding).await?;
        let greeting = format!(
            "👋 Hello {}! I'm {}. How can I help you with your health today?",
            binding.name, self.config.assistant_name
        );
        self.show_fresh_conversation(&binding.name, greeting)?;
        info!(patient = %binding.name, session_id = %id, "New session started");
        Ok(id)
    }

    /// Resume the patient's stored conversation, falling back to a fresh one
    /// when there is nothing to resume.
    ///
    /// A second call while one is running returns
    /// [`ChatError::ResumeInProgress`] without touching the bound patient.
    pub async fn load_previous(&self, name: &str) -> Result<SessionId, ChatError> {
        let slot = self.sessions.begin_resume().inspect_err(|_| {
            debug!(patient = %name.trim(), "Resume already running, ignoring");
        })?;
        let binding = self.bind(name)?;
        let name = binding.name.as_str();

        let stored = self.sessions.stored_session().unwrap_or_else(|e| {
            warn!(patient = %name, error = %e, "Failed to read stored session");
            None
        });
        if let Some(stored) = stored {
            match slot.resume(&stored, binding.epoch).await {
                Ok(snapshot) => {
                    self.replace_log(snapshot.messages)?;
                    self.surface.scroll_to_latest();
                    self.finish_identity(name);
                    info!(
                        patient = %name,
                        session_id = %snapshot.session_id,
                        "Previous session restored"
                    );
                    return Ok(snapshot.session_id);
                }
                Err(ChatError::Superseded) => return Err(ChatError::Superseded),
                Err(e) if e.is_not_found() => {
                    info!(
                        patient = %name,
                        session_id = %stored,
                        "Stored session is gone, starting a new one"
                    );
                }
                Err(e) => {
                    warn!(
                        patient = %name,
                        session_id = %stored,
                        error = %e,
                        "Resume failed, starting a new session"
                    );
                }
            }
        }

        let id = self.create_or_alert(&binding).await?;
        let greeting = format!(
            "👋 Welcome back {}! I'm {}. How can I help you with your health today?",
            name, self.config.assistant_name
        );
        self.show_fresh_conversation(name, greeting)?;
        info!(patient = %name, session_id = %id, "New session started for returning patient");
        Ok(id)
    }

    fn bind(&self, name: &str) -> Result<Binding, ChatError> {
        match self.sessions.bind_patient(name) {
            Ok(binding) => {
                self.surface.show_patient_name(&binding.name);
                Ok(binding)
            }
            Err(ChatError::EmptyPatientName) => {
                self.surface.alert(NAME_REQUIRED_ALERT);
                Err(ChatError::EmptyPatientName)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_or_alert(&self, binding: &Binding) -> Result<SessionId, ChatError> {
        match self.sessions.create_session(binding.epoch).await {
            Ok(id) => Ok(id),
            Err(ChatError::Superseded) => {
                debug!(patient = %binding.name, "Another patient was bound, dropping new session");
                Err(ChatError::Superseded)
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize session");
                self.surface.alert(&format!(
                    "Failed to connect to server. Please check if the backend is running on {}",
                    self.base_url
                ));
                Err(e)
            }
        }
    }

    fn show_fresh_conversation(&self, name: &str, greeting: String) -> Result<(), ChatError> {
        self.replace_log(vec![Message::assistant(greeting)])?;
        self.finish_identity(name);
        Ok(())
    }

    fn replace_log(&self, messages: Vec<Message>) -> Result<(), ChatError> {
        self.log()?.reset(messages.clone());
        self.surface.clear_messages();
        for message in &messages {
            self.surface.append_message(message);
        }
        Ok(())
    }

    fn finish_identity(&self, name: &str) {
        self.surface.hide_identity_modal();
        if let Err(e) = self.sessions.remember_patient_name(name) {
            warn!(patient = %name, error = %e, "Failed to save patient name");
        }
    }

    // =========================================================================
    // Text path
    // =========================================================================

    /// Send a text message and settle its placeholder.
    ///
    /// Exchange failures are rendered into the placeholder and returned as
    /// an `Error` entry; only blank input is an `Err`. A reply that lands
    /// after the conversation was replaced is returned but not rendered.
    pub async fn send_text(&self, text: &str) -> Result<Message, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        self.append(Message::user(text))?;
        let placeholder = Message::placeholder(
            Role::Assistant,
            self.config.thinking_text.clone(),
            MessageOrigin::Text,
        );
        self.append(placeholder.clone())?;

        let (session, epoch) = self.sessions.current_with_epoch()?;
        debug!(
            session_id = ?session.as_ref().map(SessionId::as_str),
            "Sending text message"
        );
        let settled = match self.service.send_text(session.as_ref(), text).await {
            Ok(reply) => {
                let live = self.reconcile(&reply.session_id, epoch);
                let audio_url = reply.audio_url.clone();
                let settled = self.settle(placeholder, MessageStatus::Final, |m| {
                    m.content = reply.response;
                    m.audio_url = reply.audio_url;
                })?;
                if live {
                    self.play(audio_url.as_deref()).await;
                }
                settled
            }
            Err(e) => {
                warn!(error = %e, "Text exchange failed");
                self.settle(placeholder, MessageStatus::Error, |m| {
                    m.content = format!("Failed to send message: {}", e.detail());
                })?
            }
        };
        Ok(settled)
    }

    // =========================================================================
    // Voice path
    // =========================================================================

    pub fn recording_state(&self) -> CaptureState {
        self.recorder.state()
    }

    /// Start recording if idle, otherwise stop and send.
    pub async fn toggle_recording(&self) -> Result<Option<Message>, ChatError> {
        if self.recorder.is_recording() {
            self.stop_recording().await
        } else {
            self.start_recording().await.map(|_| None)
        }
    }

    pub async fn start_recording(&self) -> Result<(), ChatError> {
        match self.recorder.start().await {
            Ok(id) => {
                self.surface.set_recording_indicator(true);
                debug!(recording_id = %id, "Recording indicator on");
                Ok(())
            }
            Err(e @ HealbotError::DeviceUnavailable(_)) => {
                warn!(error = %e, "Error accessing microphone");
                self.surface.alert(MICROPHONE_ALERT);
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Feed a captured fragment to the active recording.
    pub fn push_audio(&self, fragment: &[u8]) -> Result<(), ChatError> {
        Ok(self.recorder.push_fragment(fragment)?)
    }

    /// Stop recording and send what was captured.
    ///
    /// Returns the assistant entry the exchange produced (reply or error),
    /// or `None` when nothing was captured.
    pub async fn stop_recording(&self) -> Result<Option<Message>, ChatError> {
        let stopped = self.recorder.stop().await;
        self.surface.set_recording_indicator(false);
        match stopped? {
            Some(audio) => Ok(Some(self.send_voice(audio).await?)),
            None => {
                info!("Recording produced no audio, nothing sent");
                Ok(None)
            }
        }
    }

    /// Stop recording and discard the capture.
    pub fn cancel_recording(&self) -> Result<(), ChatError> {
        self.recorder.cancel()?;
        self.surface.set_recording_indicator(false);
        Ok(())
    }

    async fn send_voice(&self, audio: FinalizedAudio) -> Result<Message, ChatError> {
        let placeholder = Message::placeholder(
            Role::User,
            self.config.voice_processing_text.clone(),
            MessageOrigin::Voice,
        );
        self.append(placeholder.clone())?;

        let (session, epoch) = self.sessions.current_with_epoch()?;
        debug!(
            recording_id = %audio.recording_id(),
            session_id = ?session.as_ref().map(SessionId::as_str),
            bytes = audio.payload().len(),
            "Sending voice message"
        );
        let result = self.service.send_voice(session.as_ref(), audio.payload()).await;
        // Back to Idle before anything is rendered.
        drop(audio);

        match result {
            Ok(reply) => {
                let live = self.reconcile(&reply.session_id, epoch);
                let fallback = self.config.voice_fallback_text.clone();
                self.settle(placeholder, MessageStatus::Final, |m| {
                    m.content = reply.transcript.clone().unwrap_or(fallback);
                    m.transcript = reply.transcript.clone();
                })?;
                let answer = Message::assistant(reply.response).with_audio_url(reply.audio_url);
                if live {
                    self.append(answer.clone())?;
                    self.play(answer.audio_url.as_deref()).await;
                }
                Ok(answer)
            }
            Err(e) => {
                warn!(error = %e, "Voice exchange failed");
                let entry = Message::assistant(format!(
                    "Error: Failed to send voice message: {}",
                    e.detail()
                ))
                .with_status(MessageStatus::Error);
                if self.sessions.is_live(epoch) {
                    self.append(entry.clone())?;
                }
                Ok(entry)
            }
        }
    }

    // =========================================================================
    // Widget lifecycle and session housekeeping
    // =========================================================================

    /// Close the widget. An active recording is stopped and sent.
    pub async fn close(&self) -> Result<Option<Message>, ChatError> {
        info!("Widget closed");
        if self.recorder.is_recording() {
            return self.stop_recording().await;
        }
        Ok(None)
    }

    /// Ask the service to archive the current transcript.
    pub async fn save_transcript(&self) -> Result<String, ChatError> {
        let id = self.sessions.current().ok_or(ChatError::NoSession)?;
        let message = self.service.save_transcript(&id).await?;
        info!(session_id = %id, "Transcript saved");
        Ok(message)
    }

    /// Delete the current session everywhere and return to the identity
    /// prompt.
    pub async fn discard_session(&self) -> Result<(), ChatError> {
        let id = self.sessions.current().ok_or(ChatError::NoSession)?;
        match self.service.delete_session(&id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(session_id = %id, "Session already gone on the service");
            }
            Err(e) => return Err(e.into()),
        }
        self.sessions.forget()?;
        self.log()?.clear();
        self.surface.clear_messages();
        let patient = self.sessions.patient();
        self.surface.show_identity_modal(patient.as_deref());
        info!(session_id = %id, "Session discarded");
        Ok(())
    }

    pub async fn saved_transcripts(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.service.list_saved_transcripts().await?)
    }

    pub fn current_session(&self) -> Option<SessionId> {
        self.sessions.current()
    }

    pub fn patient(&self) -> Option<String> {
        self.sessions.patient()
    }

    /// Snapshot of the conversation log.
    pub fn messages(&self) -> Vec<Message> {
        self.log()
            .map(|log| log.messages().to_vec())
            .unwrap_or_default()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn append(&self, message: Message) -> Result<uuid::Uuid, ChatError> {
        let id = self.log()?.append(message.clone());
        self.surface.append_message(&message);
        self.surface.scroll_to_latest();
        Ok(id)
    }

    /// Settle `placeholder` in the log and re-render it.
    ///
    /// When the log was replaced while the exchange was in flight the
    /// settled copy is returned without being rendered.
    fn settle(
        &self,
        placeholder: Message,
        status: MessageStatus,
        apply: impl FnOnce(&mut Message),
    ) -> Result<Message, ChatError> {
        let mut log = self.log()?;
        if log.get(placeholder.id).is_none() {
            drop(log);
            info!(message_id = %placeholder.id, "Reply arrived after the conversation was reset");
            let mut detached = placeholder;
            apply(&mut detached);
            detached.status = status;
            return Ok(detached);
        }
        let settled = log.settle(placeholder.id, status, apply)?;
        drop(log);
        self.surface.update_message(&settled);
        self.surface.scroll_to_latest();
        Ok(settled)
    }

    /// Adopt an exchange's identifier. `false` means the exchange belongs to
    /// a conversation that has since been replaced.
    fn reconcile(&self, id: &SessionId, epoch: Epoch) -> bool {
        match self.sessions.reconcile(id, epoch) {
            Ok(live) => live,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Failed to adopt session identifier");
                self.sessions.is_live(epoch)
            }
        }
    }

    /// Best-effort playback; failures are only logged.
    async fn play(&self, audio_url: Option<&str>) {
        let Some(audio_url) = audio_url else {
            return;
        };
        let url = match self.service.resolve_audio_url(audio_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(audio_url = %audio_url, error = %e, "Cannot resolve reply audio");
                return;
            }
        };
        match self.player.play(&url).await {
            Ok(()) => debug!(%url, "Playing reply audio"),
            Err(e) => warn!(%url, error = %e, "Error playing audio"),
        }
    }
}
