use thiserror::Error;

/// Top-level error type for the HealBot client.
///
/// The first four variants form the failure taxonomy callers branch on.
/// `NotFound` is recoverable: a stale session identifier falls back to
/// creating a new session. The remaining variants cover local plumbing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HealbotError {
    #[error("Service unreachable: {0}")]
    ServiceUnreachable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl HealbotError {
    /// Whether the error means the server has no record of the session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, HealbotError::NotFound(_))
    }

    /// The underlying cause without the category prefix.
    pub fn detail(&self) -> String {
        match self {
            HealbotError::ServiceUnreachable(detail)
            | HealbotError::Protocol(detail)
            | HealbotError::DeviceUnavailable(detail)
            | HealbotError::NotFound(detail)
            | HealbotError::Config(detail)
            | HealbotError::Storage(detail)
            | HealbotError::InvalidState(detail)
            | HealbotError::Serialization(detail) => detail.clone(),
            HealbotError::Io(err) => err.to_string(),
        }
    }
}

impl From<toml::de::Error> for HealbotError {
    fn from(err: toml::de::Error) -> Self {
        HealbotError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HealbotError {
    fn from(err: toml::ser::Error) -> Self {
        HealbotError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for HealbotError {
    fn from(err: serde_json::Error) -> Self {
        HealbotError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for HealBot operations.
pub type Result<T> = std::result::Result<T, HealbotError>;
