//! JSON bodies exchanged with the assistant service.
//!
//! Response bodies are deserialized leniently (every field optional) and then
//! validated, so a structurally incomplete reply surfaces as
//! `HealbotError::Protocol` naming the missing field rather than as an opaque
//! serde message.

use serde::{Deserialize, Serialize};

use healbot_core::error::HealbotError;
use healbot_core::types::{Message, Role, SessionId, SessionSnapshot, TextReply, VoiceReply};

/// `POST /chat` request body.
#[derive(Debug, Serialize)]
pub struct ChatRequestBody<'a> {
    pub session_id: Option<&'a str>,
    pub message: &'a str,
}

/// One history entry as the service reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// `POST /session/new` and `GET /session/{id}` response body.
#[derive(Debug, Deserialize)]
pub struct SessionBody {
    pub session_id: Option<String>,
    pub messages: Option<Vec<WireMessage>>,
}

/// `POST /chat` and `POST /chat/voice` response body.
#[derive(Debug, Deserialize)]
pub struct ChatResponseBody {
    pub session_id: Option<String>,
    pub response: Option<String>,
    pub audio_url: Option<String>,
    pub transcript: Option<String>,
}

/// Acknowledgement body used by the health, save and delete endpoints.
#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub message: Option<String>,
    pub version: Option<String>,
}

/// `GET /sessions` response body.
#[derive(Debug, Deserialize)]
pub struct SavedSessionsBody {
    pub sessions: Option<Vec<String>>,
}

fn required(field: Option<String>, name: &str) -> Result<String, HealbotError> {
    field.ok_or_else(|| HealbotError::Protocol(format!("response is missing `{}`", name)))
}

/// Keep the entries the conversation log can show, in server order.
pub fn to_messages(wire: Vec<WireMessage>) -> Vec<Message> {
    wire.into_iter()
        .filter_map(|m| Role::from_wire(&m.role).map(|role| Message::new(role, m.content)))
        .collect()
}

impl SessionBody {
    pub fn into_session_id(self) -> Result<SessionId, HealbotError> {
        required(self.session_id, "session_id").map(SessionId::from)
    }

    pub fn into_snapshot(self) -> Result<SessionSnapshot, HealbotError> {
        let session_id = required(self.session_id, "session_id")?;
        let messages = self
            .messages
            .ok_or_else(|| HealbotError::Protocol("response is missing `messages`".to_string()))?;
        Ok(SessionSnapshot {
            session_id: SessionId::from(session_id),
            messages: to_messages(messages),
        })
    }
}

impl ChatResponseBody {
    pub fn into_text_reply(self) -> Result<TextReply, HealbotError> {
        Ok(TextReply {
            session_id: SessionId::from(required(self.session_id, "session_id")?),
            response: required(self.response, "response")?,
            audio_url: self.audio_url.filter(|u| !u.is_empty()),
        })
    }

    pub fn into_voice_reply(self) -> Result<VoiceReply, HealbotError> {
        Ok(VoiceReply {
            session_id: SessionId::from(required(self.session_id, "session_id")?),
            response: required(self.response, "response")?,
            audio_url: self.audio_url.filter(|u| !u.is_empty()),
            transcript: self.transcript.filter(|t| !t.is_empty()),
        })
    }
}
