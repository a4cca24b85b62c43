use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Session identity
// =============================================================================

/// Opaque, server-assigned conversation identifier.
///
/// The client never fabricates one; every value originates from a service
/// response or from the identity store (which only holds values the service
/// issued earlier).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Author of a conversation entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Map a wire role onto a renderable role.
    ///
    /// Returns `None` for roles the conversation log never shows (such as
    /// the service's `system` prompt).
    pub fn from_wire(role: &str) -> Option<Role> {
        match role {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a conversation entry.
///
/// Only `Pending` entries may change; they settle into `Final` or `Error`
/// exactly once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[default]
    Final,
    Pending,
    Error,
}

/// How the user produced an entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    #[default]
    Text,
    Voice,
}

// =============================================================================
// Messages
// =============================================================================

/// One entry in the conversation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Server-relative or absolute reference to synthesized reply audio.
    pub audio_url: Option<String>,
    /// Transcript of a voice-originated user entry.
    pub transcript: Option<String>,
    pub status: MessageStatus,
    pub origin: MessageOrigin,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A settled entry.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            audio_url: None,
            transcript: None,
            status: MessageStatus::Final,
            origin: MessageOrigin::Text,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A provisional entry awaiting the outcome of an exchange.
    pub fn placeholder(role: Role, content: impl Into<String>, origin: MessageOrigin) -> Self {
        Self {
            status: MessageStatus::Pending,
            origin,
            ..Self::new(role, content)
        }
    }

    pub fn with_audio_url(mut self, audio_url: Option<String>) -> Self {
        self.audio_url = audio_url;
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == MessageStatus::Pending
    }
}

// =============================================================================
// Exchange results
// =============================================================================

/// Reply to a text exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextReply {
    /// Identifier echoed (or rotated) by the service.
    pub session_id: SessionId,
    pub response: String,
    pub audio_url: Option<String>,
}

/// Reply to a voice exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoiceReply {
    pub session_id: SessionId,
    pub response: String,
    pub audio_url: Option<String>,
    /// What the service heard, when it could tell.
    pub transcript: Option<String>,
}

/// Session state returned when resuming.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    /// Renderable history in server order.
    pub messages: Vec<Message>,
}

/// A finalized recording ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl AudioPayload {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
