//! End-to-end conversation scenarios against the scripted mock service.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use healbot_chat::{ChatError, ConversationOrchestrator, RecordingPlayer, RecordingSurface};
use healbot_client::{MockCall, MockFailure, MockRemoteService, RemoteService, ServiceStatus, Url};
use healbot_core::config::HealbotConfig;
use healbot_core::error::HealbotError;
use healbot_core::types::{
    AudioPayload, MessageOrigin, MessageStatus, Role, SessionId, SessionSnapshot, TextReply,
    VoiceReply,
};
use healbot_storage::{Database, IdentityStore, MemoryIdentityStore, SqliteIdentityStore};
use healbot_voice::{CaptureState, CaptureStream, Microphone, MockMicrophone};

// =============================================================================
// Helpers
// =============================================================================

struct Harness {
    chat: ConversationOrchestrator,
    service: Arc<MockRemoteService>,
    identity: Arc<dyn IdentityStore>,
    mic: MockMicrophone,
    surface: Arc<RecordingSurface>,
    player: Arc<RecordingPlayer>,
}

fn harness_with(service: MockRemoteService, identity: Arc<dyn IdentityStore>) -> Harness {
    let service = Arc::new(service);
    build_harness(service.clone(), service, identity)
}

fn build_harness(
    service: Arc<MockRemoteService>,
    remote: Arc<dyn RemoteService>,
    identity: Arc<dyn IdentityStore>,
) -> Harness {
    let mic = MockMicrophone::new();
    let surface = Arc::new(RecordingSurface::new());
    let player = Arc::new(RecordingPlayer::new());
    let chat = ConversationOrchestrator::new(
        &HealbotConfig::default(),
        remote,
        identity.clone(),
        Arc::new(mic.clone()),
        surface.clone(),
        player.clone(),
    );
    Harness {
        chat,
        service,
        identity,
        mic,
        surface,
        player,
    }
}

fn harness() -> Harness {
    harness_with(MockRemoteService::new(), Arc::new(MemoryIdentityStore::new()))
}

/// Harness whose service holds one kind of call until the gate opens.
fn gated_harness(service: MockRemoteService, held: Held) -> (Harness, Arc<Notify>) {
    let service = Arc::new(service);
    let gate = Arc::new(Notify::new());
    let remote = Arc::new(GatedService {
        inner: service.clone(),
        held,
        gate: gate.clone(),
    });
    let h = build_harness(service, remote, Arc::new(MemoryIdentityStore::new()));
    (h, gate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Held {
    FetchSession,
    SendText,
    SendVoice,
}

/// Delegates to the mock, parking the held call until notified.
struct GatedService {
    inner: Arc<MockRemoteService>,
    held: Held,
    gate: Arc<Notify>,
}

impl GatedService {
    async fn pass(&self, call: Held) {
        if call == self.held {
            self.gate.notified().await;
        }
    }
}

#[async_trait]
impl RemoteService for GatedService {
    async fn health(&self) -> Result<ServiceStatus, HealbotError> {
        self.inner.health().await
    }

    async fn create_session(&self) -> Result<SessionId, HealbotError> {
        self.inner.create_session().await
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<SessionSnapshot, HealbotError> {
        self.pass(Held::FetchSession).await;
        self.inner.fetch_session(id).await
    }

    async fn send_text(
        &self,
        session_id: Option<&SessionId>,
        text: &str,
    ) -> Result<TextReply, HealbotError> {
        self.pass(Held::SendText).await;
        self.inner.send_text(session_id, text).await
    }

    async fn send_voice(
        &self,
        session_id: Option<&SessionId>,
        audio: &AudioPayload,
    ) -> Result<VoiceReply, HealbotError> {
        self.pass(Held::SendVoice).await;
        self.inner.send_voice(session_id, audio).await
    }

    async fn save_transcript(&self, id: &SessionId) -> Result<String, HealbotError> {
        self.inner.save_transcript(id).await
    }

    async fn delete_session(&self, id: &SessionId) -> Result<String, HealbotError> {
        self.inner.delete_session(id).await
    }

    async fn list_saved_transcripts(&self) -> Result<Vec<String>, HealbotError> {
        self.inner.list_saved_transcripts().await
    }

    fn resolve_audio_url(&self, audio_url: &str) -> Result<Url, HealbotError> {
        self.inner.resolve_audio_url(audio_url)
    }
}

/// Microphone whose capture only finishes once the gate opens.
struct GatedMicrophone {
    gate: Arc<Notify>,
}

struct GatedCapture {
    gate: Arc<Notify>,
}

#[async_trait]
impl Microphone for GatedMicrophone {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, HealbotError> {
        Ok(Box::new(GatedCapture {
            gate: self.gate.clone(),
        }))
    }
}

#[async_trait]
impl CaptureStream for GatedCapture {
    async fn finish(&mut self) -> Result<Vec<Vec<u8>>, HealbotError> {
        self.gate.notified().await;
        Ok(vec![vec![1, 2, 3]])
    }

    fn release(&mut self) {}
}

fn greeting_for(name: &str) -> String {
    format!(
        "👋 Hello {}! I'm Dr. HealBot. How can I help you with your health today?",
        name
    )
}

fn contents(h: &Harness) -> Vec<String> {
    h.surface.rendered().into_iter().map(|m| m.content).collect()
}

fn voice_calls(h: &Harness) -> usize {
    h.service
        .calls()
        .iter()
        .filter(|c| matches!(c, MockCall::SendVoice { .. }))
        .count()
}

async fn record(h: &Harness, bytes: &[u8]) -> Option<healbot_core::types::Message> {
    h.chat.start_recording().await.unwrap();
    h.chat.push_audio(bytes).unwrap();
    h.chat.stop_recording().await.unwrap()
}

// =============================================================================
// Identity flows
// =============================================================================

#[tokio::test]
async fn test_new_patient_gets_single_greeting() {
    let h = harness();
    h.chat.open();
    let id = h.chat.start_new("Alice").await.unwrap();

    assert_eq!(id.as_str(), "s1");
    assert_eq!(h.service.calls(), vec![MockCall::CreateSession]);
    let shown = h.surface.rendered();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].role, Role::Assistant);
    assert_eq!(
        shown[0].content,
        "👋 Hello Alice! I'm Dr. HealBot. How can I help you with your health today?"
    );
    assert!(!h.surface.modal_visible());
    assert!(h.surface.alerts().is_empty());
    assert_eq!(h.identity.last_name().unwrap().as_deref(), Some("Alice"));
    assert_eq!(h.identity.session_for("Alice").unwrap(), Some(id));
}

#[tokio::test]
async fn test_open_prefills_last_name() {
    let h = harness();
    h.identity.save_name("Alice").unwrap();
    h.chat.open();
    assert!(h
        .surface
        .events()
        .contains(&healbot_chat::SurfaceEvent::ShowModal(Some("Alice".to_string()))));
}

#[tokio::test]
async fn test_blank_name_is_rejected_with_alert() {
    let h = harness();
    h.chat.open();
    let err = h.chat.start_new("   ").await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyPatientName));
    assert_eq!(h.surface.alerts(), vec!["Please enter your name to continue."]);
    assert!(h.service.calls().is_empty());
    assert!(h.surface.modal_visible());
}

#[tokio::test]
async fn test_stale_session_falls_back_to_new_session() {
    let h = harness();
    h.identity
        .save_session_for("Bob", &SessionId::from("s2"))
        .unwrap();

    let id = h.chat.load_previous("Bob").await.unwrap();

    assert_eq!(
        h.service.calls(),
        vec![
            MockCall::FetchSession(SessionId::from("s2")),
            MockCall::CreateSession
        ]
    );
    assert_eq!(
        contents(&h),
        vec!["👋 Welcome back Bob! I'm Dr. HealBot. How can I help you with your health today?"]
    );
    assert!(h.surface.alerts().is_empty());
    assert!(h
        .surface
        .rendered()
        .iter()
        .all(|m| m.status != MessageStatus::Error));
    assert_eq!(h.chat.current_session(), Some(id.clone()));
    assert_eq!(h.identity.session_for("Bob").unwrap(), Some(id));
}

#[tokio::test]
async fn test_unreachable_resume_also_falls_back() {
    let h = harness();
    h.identity
        .save_session_for("Bob", &SessionId::from("s2"))
        .unwrap();
    h.service
        .fail_next(MockFailure::Unreachable("connection reset".to_string()));

    h.chat.load_previous("Bob").await.unwrap();
    assert!(contents(&h)[0].starts_with("👋 Welcome back Bob!"));
}

#[tokio::test]
async fn test_load_without_stored_session_creates_one() {
    let h = harness();
    h.chat.load_previous("Erin").await.unwrap();
    assert_eq!(h.service.calls(), vec![MockCall::CreateSession]);
    assert!(contents(&h)[0].starts_with("👋 Welcome back Erin!"));
}

#[tokio::test]
async fn test_resume_replays_history() {
    let service = MockRemoteService::new().with_session(
        "s2",
        &[
            (Role::Assistant, "Hello Bob"),
            (Role::User, "I have a cough"),
            (Role::Assistant, "For how long?"),
        ],
    );
    let identity: Arc<dyn IdentityStore> = Arc::new(MemoryIdentityStore::new());
    identity
        .save_session_for("Bob", &SessionId::from("s2"))
        .unwrap();
    let h = harness_with(service, identity);

    let id = h.chat.load_previous("Bob").await.unwrap();

    assert_eq!(id.as_str(), "s2");
    assert_eq!(
        contents(&h),
        vec!["Hello Bob", "I have a cough", "For how long?"]
    );
    assert_eq!(h.chat.messages().len(), 3);
    assert!(!h
        .service
        .calls()
        .contains(&MockCall::CreateSession));
    assert!(!h.surface.modal_visible());
}

#[tokio::test]
async fn test_create_failure_alerts_and_keeps_modal() {
    let h = harness();
    h.service.set_offline(true);
    h.chat.open();

    let err = h.chat.start_new("Alice").await.unwrap_err();
    assert!(matches!(err, ChatError::Service(_)));
    assert_eq!(
        h.surface.alerts(),
        vec![
            "Failed to connect to server. \
             Please check if the backend is running on http://localhost:8000"
        ]
    );
    assert!(h.surface.modal_visible());
    assert!(h.surface.rendered().is_empty());
    assert_eq!(h.identity.last_name().unwrap(), None);
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("identity.db");
    let service = Arc::new(MockRemoteService::new());

    let first_id = {
        let identity = Arc::new(SqliteIdentityStore::new(Arc::new(Database::new(&path).unwrap())));
        let chat = ConversationOrchestrator::new(
            &HealbotConfig::default(),
            service.clone(),
            identity,
            Arc::new(MockMicrophone::new()),
            Arc::new(RecordingSurface::new()),
            Arc::new(RecordingPlayer::new()),
        );
        chat.start_new("Dana").await.unwrap()
    };

    let identity = Arc::new(SqliteIdentityStore::new(Arc::new(Database::new(&path).unwrap())));
    let surface = Arc::new(RecordingSurface::new());
    let chat = ConversationOrchestrator::new(
        &HealbotConfig::default(),
        service.clone(),
        identity.clone(),
        Arc::new(MockMicrophone::new()),
        surface.clone(),
        Arc::new(RecordingPlayer::new()),
    );
    chat.open();
    assert!(surface
        .events()
        .contains(&healbot_chat::SurfaceEvent::ShowModal(Some("Dana".to_string()))));

    let resumed = chat.load_previous("Dana").await.unwrap();
    assert_eq!(resumed, first_id);
    assert_eq!(
        service
            .calls()
            .iter()
            .filter(|c| **c == MockCall::CreateSession)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_second_load_while_resuming_leaves_patient_alone() {
    let (h, gate) = gated_harness(
        MockRemoteService::new().with_session("alice-s", &[(Role::User, "my private symptom")]),
        Held::FetchSession,
    );
    h.identity
        .save_session_for("Alice", &SessionId::from("alice-s"))
        .unwrap();

    let (alice, bob) = tokio::join!(h.chat.load_previous("Alice"), async {
        let bob = h.chat.load_previous("Bob").await;
        gate.notify_one();
        bob
    });

    assert_eq!(alice.unwrap(), SessionId::from("alice-s"));
    assert!(matches!(bob, Err(ChatError::ResumeInProgress)));
    assert_eq!(h.chat.patient().as_deref(), Some("Alice"));
    assert_eq!(h.identity.session_for("Bob").unwrap(), None);
    assert_eq!(
        h.identity.session_for("Alice").unwrap(),
        Some(SessionId::from("alice-s"))
    );
    assert_eq!(contents(&h), vec!["my private symptom"]);
    assert!(!h
        .surface
        .events()
        .contains(&healbot_chat::SurfaceEvent::PatientName("Bob".to_string())));
    assert!(!h.service.calls().contains(&MockCall::CreateSession));
}

#[tokio::test]
async fn test_new_patient_during_resume_drops_stale_history() {
    let (h, gate) = gated_harness(
        MockRemoteService::new().with_session("alice-s", &[(Role::User, "my private symptom")]),
        Held::FetchSession,
    );
    h.identity
        .save_session_for("Alice", &SessionId::from("alice-s"))
        .unwrap();

    let (alice, bob) = tokio::join!(h.chat.load_previous("Alice"), async {
        let bob = h.chat.start_new("Bob").await;
        gate.notify_one();
        bob
    });

    assert!(matches!(alice, Err(ChatError::Superseded)));
    let bob = bob.unwrap();
    assert_eq!(h.chat.patient().as_deref(), Some("Bob"));
    assert_eq!(h.chat.current_session(), Some(bob.clone()));
    assert_eq!(h.identity.session_for("Bob").unwrap(), Some(bob));
    assert_eq!(
        h.identity.session_for("Alice").unwrap(),
        Some(SessionId::from("alice-s"))
    );
    assert_eq!(contents(&h), vec![greeting_for("Bob")]);
    assert!(h.surface.alerts().is_empty());
}

// =============================================================================
// Text path
// =============================================================================

#[tokio::test]
async fn test_text_exchange_settles_placeholder() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service.set_reply("Drink plenty of water.");

    let reply = h.chat.send_text("  I feel dizzy ").await.unwrap();

    assert_eq!(reply.status, MessageStatus::Final);
    assert_eq!(reply.content, "Drink plenty of water.");
    let shown = h.surface.rendered();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[1].role, Role::User);
    assert_eq!(shown[1].content, "I feel dizzy");
    assert_eq!(shown[2].id, reply.id);
    assert_eq!(shown[2].content, "Drink plenty of water.");
    assert!(h.service.calls().contains(&MockCall::SendText {
        session_id: Some(SessionId::from("s1")),
        text: "I feel dizzy".to_string(),
    }));
}

#[tokio::test]
async fn test_placeholder_is_shown_before_reply() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.chat.send_text("hello").await.unwrap();

    let appended: Vec<(Role, String, MessageStatus)> = h
        .surface
        .events()
        .into_iter()
        .filter_map(|e| match e {
            healbot_chat::SurfaceEvent::Append(m) => Some((m.role, m.content, m.status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        &appended[1..],
        &[
            (Role::User, "hello".to_string(), MessageStatus::Final),
            (Role::Assistant, "Thinking...".to_string(), MessageStatus::Pending),
        ]
    );
}

#[tokio::test]
async fn test_blank_text_sends_nothing() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    let err = h.chat.send_text(" \n ").await.unwrap_err();
    assert!(matches!(err, ChatError::EmptyMessage));
    assert_eq!(h.surface.rendered().len(), 1);
    assert_eq!(h.service.calls().len(), 1);
}

#[tokio::test]
async fn test_text_failure_becomes_error_entry() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service
        .fail_next(MockFailure::Unreachable("HTTP error! status: 500".to_string()));

    let entry = h.chat.send_text("hello").await.unwrap();

    assert_eq!(entry.status, MessageStatus::Error);
    assert_eq!(
        entry.content,
        "Failed to send message: HTTP error! status: 500"
    );
    let shown = h.surface.rendered();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[2].status, MessageStatus::Error);
    assert!(h.chat.messages().iter().all(|m| !m.is_pending()));
}

#[tokio::test]
async fn test_text_reply_audio_is_played() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service.set_reply_audio_url(Some("/audio/reply.mp3"));

    let reply = h.chat.send_text("hello").await.unwrap();

    assert_eq!(reply.audio_url.as_deref(), Some("/audio/reply.mp3"));
    let played: Vec<String> = h.player.played().iter().map(|u| u.to_string()).collect();
    assert_eq!(played, vec!["http://mock.healbot.local/audio/reply.mp3"]);
}

#[tokio::test]
async fn test_playback_failure_does_not_touch_messages() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service.set_reply_audio_url(Some("/audio/reply.mp3"));
    h.player.set_failing(true);

    let reply = h.chat.send_text("hello").await.unwrap();
    assert_eq!(reply.status, MessageStatus::Final);
    assert_eq!(h.player.played().len(), 1);
}

#[tokio::test]
async fn test_rotated_session_id_is_adopted_and_persisted() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service.rotate_next_session("s99");

    h.chat.send_text("hello").await.unwrap();

    assert_eq!(h.chat.current_session(), Some(SessionId::from("s99")));
    assert_eq!(
        h.identity.session_for("Alice").unwrap(),
        Some(SessionId::from("s99"))
    );
    h.chat.send_text("again").await.unwrap();
    assert!(h.service.calls().contains(&MockCall::SendText {
        session_id: Some(SessionId::from("s99")),
        text: "again".to_string(),
    }));
}

#[tokio::test]
async fn test_text_reply_after_new_session_is_not_rendered() {
    let (h, gate) = gated_harness(MockRemoteService::new(), Held::SendText);
    let alice = h.chat.start_new("Alice").await.unwrap();
    h.service.set_reply("Late answer");
    h.service.set_reply_audio_url(Some("/audio/late.mp3"));
    h.service.rotate_next_session("rotated");

    let (reply, bob) = tokio::join!(h.chat.send_text("hello"), async {
        let bob = h.chat.start_new("Bob").await;
        gate.notify_one();
        bob
    });

    let reply = reply.unwrap();
    assert_eq!(reply.status, MessageStatus::Final);
    assert_eq!(reply.content, "Late answer");
    let bob = bob.unwrap();
    assert_eq!(h.chat.current_session(), Some(bob.clone()));
    assert_eq!(h.identity.session_for("Bob").unwrap(), Some(bob));
    assert_eq!(h.identity.session_for("Alice").unwrap(), Some(alice));
    assert_eq!(contents(&h), vec![greeting_for("Bob")]);
    assert_eq!(h.chat.messages().len(), 1);
    assert!(h.player.played().is_empty());
}

// =============================================================================
// Voice path
// =============================================================================

#[tokio::test]
async fn test_voice_exchange_shows_transcript_and_reply() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service.set_reply("Take rest");
    h.service.set_transcript(Some("I have a fever"));

    let answer = record(&h, &[1, 2, 3, 4]).await.unwrap();

    assert_eq!(answer.content, "Take rest");
    let shown = h.surface.rendered();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[1].role, Role::User);
    assert_eq!(shown[1].content, "I have a fever");
    assert_eq!(shown[1].transcript.as_deref(), Some("I have a fever"));
    assert_eq!(shown[1].origin, MessageOrigin::Voice);
    assert_eq!(shown[1].status, MessageStatus::Final);
    assert_eq!(shown[2].role, Role::Assistant);
    assert_eq!(shown[2].content, "Take rest");

    assert!(h.service.calls().contains(&MockCall::SendVoice {
        session_id: Some(SessionId::from("s1")),
        bytes: 4,
    }));
    assert_eq!(h.mic.releases(), 1);
    assert!(!h.surface.recording_indicator());
    assert_eq!(h.chat.recording_state(), CaptureState::Idle);
}

#[tokio::test]
async fn test_voice_without_transcript_uses_fallback() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();

    record(&h, &[9]).await.unwrap();

    assert_eq!(h.surface.rendered()[1].content, "[Voice message]");
    assert!(h.surface.rendered()[1].transcript.is_none());
}

#[tokio::test]
async fn test_voice_failure_appends_error_and_keeps_placeholder() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service
        .fail_next(MockFailure::Unreachable("HTTP error! status: 502".to_string()));

    let entry = record(&h, &[1, 2]).await.unwrap();

    assert_eq!(entry.role, Role::Assistant);
    assert_eq!(entry.status, MessageStatus::Error);
    assert_eq!(
        entry.content,
        "Error: Failed to send voice message: HTTP error! status: 502"
    );
    let shown = h.surface.rendered();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[1].content, "Processing voice message...");
    assert!(shown[1].is_pending());
    assert_eq!(h.mic.releases(), 1);
    assert_eq!(h.chat.recording_state(), CaptureState::Idle);
}

#[tokio::test]
async fn test_voice_before_session_lets_service_open_one() {
    let h = harness();
    h.service.set_transcript(Some("hello"));

    record(&h, &[5, 5]).await.unwrap();

    assert!(h.service.calls().contains(&MockCall::SendVoice {
        session_id: None,
        bytes: 2,
    }));
    assert_eq!(h.chat.current_session(), Some(SessionId::from("s1")));
}

#[tokio::test]
async fn test_microphone_denied() {
    let h = harness();
    h.mic.set_denied(true);

    let err = h.chat.toggle_recording().await.unwrap_err();

    assert!(matches!(
        err,
        ChatError::Service(healbot_core::error::HealbotError::DeviceUnavailable(_))
    ));
    assert_eq!(
        h.surface.alerts(),
        vec!["Unable to access microphone. Please check permissions."]
    );
    assert_eq!(h.chat.recording_state(), CaptureState::Idle);
    assert!(!h.surface.recording_indicator());
}

#[tokio::test]
async fn test_toggle_records_then_sends() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();

    assert!(h.chat.toggle_recording().await.unwrap().is_none());
    assert!(h.surface.recording_indicator());
    h.chat.push_audio(&[3; 16]).unwrap();
    let answer = h.chat.toggle_recording().await.unwrap();

    assert!(answer.is_some());
    assert_eq!(voice_calls(&h), 1);
    assert!(!h.surface.recording_indicator());
}

#[tokio::test]
async fn test_stop_without_audio_sends_nothing() {
    let h = harness();
    h.chat.start_recording().await.unwrap();
    assert!(h.chat.stop_recording().await.unwrap().is_none());
    assert_eq!(voice_calls(&h), 0);
    assert!(h.surface.rendered().is_empty());
    assert_eq!(h.mic.releases(), 1);
}

#[tokio::test]
async fn test_cancel_discards_recording() {
    let h = harness();
    h.chat.start_recording().await.unwrap();
    h.chat.push_audio(&[1, 2, 3]).unwrap();
    h.chat.cancel_recording().unwrap();

    assert_eq!(voice_calls(&h), 0);
    assert_eq!(h.mic.releases(), 1);
    assert!(!h.surface.recording_indicator());
}

#[tokio::test]
async fn test_close_while_recording_sends_capture() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.chat.start_recording().await.unwrap();
    h.chat.push_audio(&[8, 8, 8]).unwrap();

    let sent = h.chat.close().await.unwrap();

    assert!(sent.is_some());
    assert_eq!(voice_calls(&h), 1);
    assert_eq!(h.mic.releases(), 1);
    assert!(h.chat.close().await.unwrap().is_none());
}

#[tokio::test]
async fn test_one_release_per_recording() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service
        .fail_next(MockFailure::Protocol("response is missing `response`".to_string()));
    record(&h, &[1]).await.unwrap();
    record(&h, &[2]).await.unwrap();
    h.chat.start_recording().await.unwrap();
    h.chat.cancel_recording().unwrap();

    assert_eq!(h.mic.acquisitions(), 3);
    assert_eq!(h.mic.releases(), 3);
}

#[tokio::test]
async fn test_voice_reply_after_new_session_is_not_rendered() {
    let (h, gate) = gated_harness(MockRemoteService::new(), Held::SendVoice);
    h.chat.start_new("Alice").await.unwrap();
    h.service.set_transcript(Some("I have a fever"));
    h.service.set_reply_audio_url(Some("/audio/late.mp3"));

    let (answer, bob) = tokio::join!(record(&h, &[1, 2]), async {
        let bob = h.chat.start_new("Bob").await;
        gate.notify_one();
        bob
    });

    assert!(answer.is_some());
    let bob = bob.unwrap();
    assert_eq!(h.chat.current_session(), Some(bob));
    assert_eq!(contents(&h), vec![greeting_for("Bob")]);
    assert!(h.player.played().is_empty());
    assert_eq!(h.mic.releases(), 1);
    assert_eq!(h.chat.recording_state(), CaptureState::Idle);
}

#[tokio::test]
async fn test_failed_stop_still_clears_indicator() {
    let gate = Arc::new(Notify::new());
    let surface = Arc::new(RecordingSurface::new());
    let chat = ConversationOrchestrator::new(
        &HealbotConfig::default(),
        Arc::new(MockRemoteService::new()),
        Arc::new(MemoryIdentityStore::new()),
        Arc::new(GatedMicrophone { gate: gate.clone() }),
        surface.clone(),
        Arc::new(RecordingPlayer::new()),
    );
    chat.start_recording().await.unwrap();
    assert!(surface.recording_indicator());

    let (first, (second, indicator)) = tokio::join!(chat.stop_recording(), async {
        let second = chat.stop_recording().await;
        let indicator = surface.recording_indicator();
        gate.notify_one();
        (second, indicator)
    });

    assert!(second.is_err());
    assert!(!indicator);
    assert!(first.unwrap().is_some());
    assert!(!surface.recording_indicator());
}

// =============================================================================
// Housekeeping
// =============================================================================

#[tokio::test]
async fn test_save_and_list_transcripts() {
    let h = harness();
    assert!(matches!(
        h.chat.save_transcript().await,
        Err(ChatError::NoSession)
    ));

    h.chat.start_new("Alice").await.unwrap();
    let message = h.chat.save_transcript().await.unwrap();
    assert!(message.contains("session_s1.json"));
    assert_eq!(
        h.chat.saved_transcripts().await.unwrap(),
        vec!["session_s1.json".to_string()]
    );
}

#[tokio::test]
async fn test_discard_session() {
    let h = harness();
    let id = h.chat.start_new("Alice").await.unwrap();
    h.chat.send_text("hello").await.unwrap();

    h.chat.discard_session().await.unwrap();

    assert!(h.service.calls().contains(&MockCall::DeleteSession(id.clone())));
    assert!(!h.service.has_session(&id));
    assert_eq!(h.chat.current_session(), None);
    assert_eq!(h.identity.session_for("Alice").unwrap(), None);
    assert!(h.chat.messages().is_empty());
    assert!(h.surface.rendered().is_empty());
    assert!(h.surface.modal_visible());
}

#[tokio::test]
async fn test_discard_tolerates_missing_remote_session() {
    let h = harness();
    h.chat.start_new("Alice").await.unwrap();
    h.service.fail_next(MockFailure::NotFound);
    h.chat.discard_session().await.unwrap();
    assert_eq!(h.chat.current_session(), None);
}
