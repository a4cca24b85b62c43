//! Error types for the conversation layer.

use healbot_core::error::HealbotError;

/// Errors from the conversation orchestrator and session manager.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("patient name cannot be empty")]
    EmptyPatientName,
    #[error("no patient is bound")]
    NoPatient,
    #[error("no active session")]
    NoSession,
    #[error("a session resume is already in progress")]
    ResumeInProgress,
    #[error("the patient changed while the request was in flight")]
    Superseded,
    #[error(transparent)]
    Service(#[from] HealbotError),
}

impl ChatError {
    /// Whether the service reported the session as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ChatError::Service(e) if e.is_not_found())
    }
}
