//! In-memory stand-in for the assistant service.
//!
//! Keeps per-session histories the way the real service does, records every
//! call, and can be scripted to fail or to rotate session identifiers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::Url;

use healbot_core::error::HealbotError;
use healbot_core::types::{
    AudioPayload, Message, Role, SessionId, SessionSnapshot, TextReply, VoiceReply,
};

use crate::service::{join_audio_url, RemoteService, ServiceStatus};
use crate::wire::{to_messages, WireMessage};

const SYSTEM_PROMPT: &str = "You are a careful medical assistant.";
const SERVICE_GREETING: &str = "Hello! How are you feeling today?";
const MOCK_BASE_URL: &str = "http://mock.healbot.local";

/// A scripted failure for the next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFailure {
    Unreachable(String),
    Protocol(String),
    NotFound,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Health,
    CreateSession,
    FetchSession(SessionId),
    SendText {
        session_id: Option<SessionId>,
        text: String,
    },
    SendVoice {
        session_id: Option<SessionId>,
        bytes: usize,
    },
    SaveTranscript(SessionId),
    DeleteSession(SessionId),
    ListSaved,
}

#[derive(Debug)]
struct MockState {
    next_id: u64,
    sessions: HashMap<SessionId, Vec<WireMessage>>,
    saved: Vec<String>,
    reply_text: String,
    reply_audio_url: Option<String>,
    transcript: Option<String>,
    rotate_to: Option<SessionId>,
    failures: VecDeque<MockFailure>,
    offline: bool,
    calls: Vec<MockCall>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            next_id: 1,
            sessions: HashMap::new(),
            saved: Vec::new(),
            reply_text: "Please tell me more.".to_string(),
            reply_audio_url: None,
            transcript: None,
            rotate_to: None,
            failures: VecDeque::new(),
            offline: false,
            calls: Vec::new(),
        }
    }
}

impl MockState {
    fn open_session(&mut self) -> SessionId {
        let id = SessionId::new(format!("s{}", self.next_id));
        self.next_id += 1;
        self.sessions.insert(
            id.clone(),
            vec![
                wire("system", SYSTEM_PROMPT),
                wire("assistant", SERVICE_GREETING),
            ],
        );
        id
    }

    /// Resolve the session an exchange lands in, opening one when the
    /// caller has none or the service no longer knows it.
    fn exchange_session(&mut self, requested: Option<&SessionId>) -> SessionId {
        match requested {
            Some(id) if self.sessions.contains_key(id) => id.clone(),
            _ => self.open_session(),
        }
    }

    /// Apply a pending identifier rotation to `id`.
    fn settle_id(&mut self, id: SessionId) -> SessionId {
        match self.rotate_to.take() {
            Some(new_id) => {
                let history = self.sessions.remove(&id).unwrap_or_default();
                self.sessions.insert(new_id.clone(), history);
                new_id
            }
            None => id,
        }
    }

    fn check_failure(&mut self) -> Result<(), HealbotError> {
        if self.offline {
            return Err(HealbotError::ServiceUnreachable(
                "connection refused".to_string(),
            ));
        }
        match self.failures.pop_front() {
            None => Ok(()),
            Some(MockFailure::Unreachable(msg)) => Err(HealbotError::ServiceUnreachable(msg)),
            Some(MockFailure::Protocol(msg)) => Err(HealbotError::Protocol(msg)),
            Some(MockFailure::NotFound) => {
                Err(HealbotError::NotFound("scripted failure".to_string()))
            }
        }
    }
}

fn wire(role: &str, content: &str) -> WireMessage {
    WireMessage {
        role: role.to_string(),
        content: content.to_string(),
    }
}

/// Scriptable [`RemoteService`] that keeps sessions in memory.
#[derive(Debug, Default)]
pub struct MockRemoteService {
    state: Mutex<MockState>,
}

impl MockRemoteService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a session with prior history.
    pub fn with_session(self, id: impl Into<SessionId>, history: &[(Role, &str)]) -> Self {
        {
            let mut state = self.state();
            let mut messages = vec![wire("system", SYSTEM_PROMPT)];
            messages.extend(history.iter().map(|(role, content)| wire(role.as_str(), content)));
            state.sessions.insert(id.into(), messages);
        }
        self
    }

    /// Text the assistant answers every exchange with.
    pub fn set_reply(&self, text: impl Into<String>) {
        self.state().reply_text = text.into();
    }

    pub fn set_reply_audio_url(&self, audio_url: Option<&str>) {
        self.state().reply_audio_url = audio_url.map(str::to_string);
    }

    /// Transcript reported for voice exchanges; `None` means the service
    /// could not tell what was said.
    pub fn set_transcript(&self, transcript: Option<&str>) {
        self.state().transcript = transcript.map(str::to_string);
    }

    /// Make the next exchange answer under `id` instead of the session it
    /// ran in.
    pub fn rotate_next_session(&self, id: impl Into<SessionId>) {
        self.state().rotate_to = Some(id.into());
    }

    /// Queue a failure; queued failures are consumed one per call.
    pub fn fail_next(&self, failure: MockFailure) {
        self.state().failures.push_back(failure);
    }

    /// While offline every call fails as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn has_session(&self, id: &SessionId) -> bool {
        self.state().sessions.contains_key(id)
    }

    /// Renderable history of a session, as a fetch would return it.
    pub fn session_messages(&self, id: &SessionId) -> Option<Vec<Message>> {
        self.state().sessions.get(id).cloned().map(to_messages)
    }

    fn begin(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, HealbotError> {
        let mut state = self.state();
        state.calls.push(call);
        state.check_failure()?;
        Ok(state)
    }
}

#[async_trait]
impl RemoteService for MockRemoteService {
    async fn health(&self) -> Result<ServiceStatus, HealbotError> {
        self.begin(MockCall::Health)?;
        Ok(ServiceStatus {
            message: "HealBot API is running".to_string(),
            version: Some("mock".to_string()),
        })
    }

    async fn create_session(&self) -> Result<SessionId, HealbotError> {
        let mut state = self.begin(MockCall::CreateSession)?;
        Ok(state.open_session())
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<SessionSnapshot, HealbotError> {
        let state = self.begin(MockCall::FetchSession(id.clone()))?;
        let history = state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| HealbotError::NotFound(format!("session {}", id)))?;
        Ok(SessionSnapshot {
            session_id: id.clone(),
            messages: to_messages(history),
        })
    }

    async fn send_text(
        &self,
        session_id: Option<&SessionId>,
        text: &str,
    ) -> Result<TextReply, HealbotError> {
        let mut state = self.begin(MockCall::SendText {
            session_id: session_id.cloned(),
            text: text.to_string(),
        })?;
        let id = state.exchange_session(session_id);
        let reply = state.reply_text.clone();
        if let Some(history) = state.sessions.get_mut(&id) {
            history.push(wire("user", text));
            history.push(wire("assistant", &reply));
        }
        let id = state.settle_id(id);
        Ok(TextReply {
            session_id: id,
            response: reply,
            audio_url: state.reply_audio_url.clone(),
        })
    }

    async fn send_voice(
        &self,
        session_id: Option<&SessionId>,
        audio: &AudioPayload,
    ) -> Result<VoiceReply, HealbotError> {
        let mut state = self.begin(MockCall::SendVoice {
            session_id: session_id.cloned(),
            bytes: audio.len(),
        })?;
        if audio.is_empty() {
            return Err(HealbotError::ServiceUnreachable(
                "HTTP error! status: 400".to_string(),
            ));
        }
        let id = state.exchange_session(session_id);
        let reply = state.reply_text.clone();
        let transcript = state.transcript.clone();
        if let Some(history) = state.sessions.get_mut(&id) {
            if let Some(heard) = &transcript {
                history.push(wire("user", heard));
            }
            history.push(wire("assistant", &reply));
        }
        let id = state.settle_id(id);
        Ok(VoiceReply {
            session_id: id,
            response: reply,
            audio_url: state.reply_audio_url.clone(),
            transcript,
        })
    }

    async fn save_transcript(&self, id: &SessionId) -> Result<String, HealbotError> {
        let mut state = self.begin(MockCall::SaveTranscript(id.clone()))?;
        if !state.sessions.contains_key(id) {
            return Err(HealbotError::NotFound(format!("session {}", id)));
        }
        let file_name = format!("session_{}.json", id);
        state.saved.retain(|f| f != &file_name);
        state.saved.insert(0, file_name.clone());
        Ok(format!("Session saved to {}", file_name))
    }

    async fn delete_session(&self, id: &SessionId) -> Result<String, HealbotError> {
        let mut state = self.begin(MockCall::DeleteSession(id.clone()))?;
        state
            .sessions
            .remove(id)
            .map(|_| "Session deleted".to_string())
            .ok_or_else(|| HealbotError::NotFound(format!("session {}", id)))
    }

    async fn list_saved_transcripts(&self) -> Result<Vec<String>, HealbotError> {
        let state = self.begin(MockCall::ListSaved)?;
        Ok(state.saved.clone())
    }

    fn resolve_audio_url(&self, audio_url: &str) -> Result<Url, HealbotError> {
        join_audio_url(MOCK_BASE_URL, audio_url)
    }
}
