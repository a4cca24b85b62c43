//! The remote assistant service as seen by the client.

use async_trait::async_trait;
use reqwest::Url;

use healbot_core::error::HealbotError;
use healbot_core::types::{AudioPayload, SessionId, SessionSnapshot, TextReply, VoiceReply};

/// Result of the service health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub message: String,
    pub version: Option<String>,
}

/// Request/response operations offered by the assistant service.
///
/// Every call is a single round trip with no retry. Transport failures and
/// non-success statuses map to `ServiceUnreachable`, malformed bodies to
/// `Protocol`, and unknown session identifiers to `NotFound`.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn health(&self) -> Result<ServiceStatus, HealbotError>;

    /// Ask the service to open a brand-new conversation.
    async fn create_session(&self) -> Result<SessionId, HealbotError>;

    /// Fetch a conversation's renderable history.
    async fn fetch_session(&self, id: &SessionId) -> Result<SessionSnapshot, HealbotError>;

    /// Send a text turn. Without a session the service opens one; the
    /// identifier in the reply is authoritative either way.
    async fn send_text(
        &self,
        session_id: Option<&SessionId>,
        text: &str,
    ) -> Result<TextReply, HealbotError>;

    /// Upload a finalized recording as a voice turn.
    async fn send_voice(
        &self,
        session_id: Option<&SessionId>,
        audio: &AudioPayload,
    ) -> Result<VoiceReply, HealbotError>;

    /// Ask the service to write the conversation transcript to its archive.
    async fn save_transcript(&self, id: &SessionId) -> Result<String, HealbotError>;

    async fn delete_session(&self, id: &SessionId) -> Result<String, HealbotError>;

    /// File names of archived transcripts, newest first.
    async fn list_saved_transcripts(&self) -> Result<Vec<String>, HealbotError>;

    /// Turn a reply's `audio_url` into a fetchable address.
    fn resolve_audio_url(&self, audio_url: &str) -> Result<Url, HealbotError>;
}

/// Resolve `audio_url` against `base_url`.
///
/// Absolute URLs pass through; anything else is appended to the base
/// address verbatim, so a base with a path prefix keeps it.
pub fn join_audio_url(base_url: &str, audio_url: &str) -> Result<Url, HealbotError> {
    if let Ok(url) = Url::parse(audio_url) {
        return Ok(url);
    }
    let joined = format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        audio_url.trim_start_matches('/')
    );
    Url::parse(&joined)
        .map_err(|e| HealbotError::Protocol(format!("invalid audio url {}: {}", joined, e)))
}
