//! reqwest-backed implementation of [`RemoteService`].

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use healbot_core::error::HealbotError;
use healbot_core::types::{AudioPayload, SessionId, SessionSnapshot, TextReply, VoiceReply};

use crate::service::{join_audio_url, RemoteService, ServiceStatus};
use crate::wire::{ChatRequestBody, ChatResponseBody, SavedSessionsBody, SessionBody, StatusBody};

/// HTTP client for the assistant service.
///
/// No timeout is configured on requests: a call fails only when the
/// transport reports a failure.
#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: Client,
    base_url: Url,
}

impl HttpServiceClient {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, HealbotError> {
        Self::with_client(Client::new(), base_url)
    }

    /// Create a client reusing an existing reqwest `Client`.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, HealbotError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| HealbotError::Config(format!("invalid base url {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(HealbotError::Config(format!(
                "base url cannot carry paths: {}",
                base_url
            )));
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HealbotError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                HealbotError::Config(format!("base url cannot carry paths: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn unreachable(err: reqwest::Error) -> HealbotError {
    HealbotError::ServiceUnreachable(err.to_string())
}

fn status_error(status: StatusCode) -> HealbotError {
    HealbotError::ServiceUnreachable(format!("HTTP error! status: {}", status.as_u16()))
}

/// Reject non-success statuses, then decode the body.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, HealbotError> {
    let status = response.status();
    if !status.is_success() {
        return Err(status_error(status));
    }
    let bytes = response.bytes().await.map_err(unreachable)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| HealbotError::Protocol(format!("malformed response body: {}", e)))
}

/// Like [`read_json`], but a 404 means the session is unknown.
async fn read_session_json<T: DeserializeOwned>(
    response: Response,
    id: &SessionId,
) -> Result<T, HealbotError> {
    if response.status() == StatusCode::NOT_FOUND {
        return Err(HealbotError::NotFound(format!("session {}", id)));
    }
    read_json(response).await
}

#[async_trait]
impl RemoteService for HttpServiceClient {
    async fn health(&self) -> Result<ServiceStatus, HealbotError> {
        let url = self.endpoint(&[])?;
        let response = self.client.get(url).send().await.map_err(unreachable)?;
        let body: StatusBody = read_json(response).await?;
        Ok(ServiceStatus {
            message: body.message.unwrap_or_default(),
            version: body.version,
        })
    }

    async fn create_session(&self) -> Result<SessionId, HealbotError> {
        let url = self.endpoint(&["session", "new"])?;
        debug!(%url, "Requesting new session");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(unreachable)?;
        let id = read_json::<SessionBody>(response).await?.into_session_id()?;
        info!(session_id = %id, "Session created");
        Ok(id)
    }

    async fn fetch_session(&self, id: &SessionId) -> Result<SessionSnapshot, HealbotError> {
        let url = self.endpoint(&["session", id.as_str()])?;
        debug!(%url, "Fetching session");
        let response = self.client.get(url).send().await.map_err(unreachable)?;
        // Any client error means the identifier is no longer usable.
        if response.status().is_client_error() {
            return Err(HealbotError::NotFound(format!(
                "session {} (status {})",
                id,
                response.status().as_u16()
            )));
        }
        read_json::<SessionBody>(response).await?.into_snapshot()
    }

    async fn send_text(
        &self,
        session_id: Option<&SessionId>,
        text: &str,
    ) -> Result<TextReply, HealbotError> {
        let url = self.endpoint(&["chat"])?;
        let body = ChatRequestBody {
            session_id: session_id.map(SessionId::as_str),
            message: text,
        };
        debug!(
            session_id = ?session_id.map(SessionId::as_str),
            chars = text.len(),
            "Sending text message"
        );
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(unreachable)?;
        read_json::<ChatResponseBody>(response)
            .await?
            .into_text_reply()
    }

    async fn send_voice(
        &self,
        session_id: Option<&SessionId>,
        audio: &AudioPayload,
    ) -> Result<VoiceReply, HealbotError> {
        let url = self.endpoint(&["chat", "voice"])?;
        let part = Part::bytes(audio.data.clone())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)
            .map_err(|e| {
                HealbotError::Config(format!("invalid audio mime type {}: {}", audio.mime_type, e))
            })?;
        let mut form = Form::new().part("audio", part);
        if let Some(id) = session_id {
            form = form.text("session_id", id.to_string());
        }
        debug!(
            session_id = ?session_id.map(SessionId::as_str),
            bytes = audio.len(),
            "Sending voice message"
        );
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(unreachable)?;
        read_json::<ChatResponseBody>(response)
            .await?
            .into_voice_reply()
    }

    async fn save_transcript(&self, id: &SessionId) -> Result<String, HealbotError> {
        let url = self.endpoint(&["session", id.as_str(), "save"])?;
        let response = self.client.post(url).send().await.map_err(unreachable)?;
        let body: StatusBody = read_session_json(response, id).await?;
        info!(session_id = %id, "Transcript saved");
        Ok(body.message.unwrap_or_default())
    }

    async fn delete_session(&self, id: &SessionId) -> Result<String, HealbotError> {
        let url = self.endpoint(&["session", id.as_str()])?;
        let response = self.client.delete(url).send().await.map_err(unreachable)?;
        let body: StatusBody = read_session_json(response, id).await?;
        info!(session_id = %id, "Session deleted");
        Ok(body.message.unwrap_or_default())
    }

    async fn list_saved_transcripts(&self) -> Result<Vec<String>, HealbotError> {
        let url = self.endpoint(&["sessions"])?;
        let response = self.client.get(url).send().await.map_err(unreachable)?;
        let body: SavedSessionsBody = read_json(response).await?;
        body.sessions
            .ok_or_else(|| HealbotError::Protocol("response is missing `sessions`".to_string()))
    }

    fn resolve_audio_url(&self, audio_url: &str) -> Result<Url, HealbotError> {
        join_audio_url(self.base_url.as_str(), audio_url)
    }
}
