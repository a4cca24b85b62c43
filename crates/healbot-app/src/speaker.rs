//! Reply audio playback through rodio.
//!
//! The reply is fetched over HTTP, then decoded and played on a blocking
//! thread that owns the output stream until the sink drains.

use std::io::Cursor;

use async_trait::async_trait;
use reqwest::{Client, Url};
use rodio::{Decoder, OutputStream, Sink};
use tracing::{debug, warn};

use healbot_chat::AudioPlayer;
use healbot_core::error::HealbotError;

#[derive(Debug, Clone, Default)]
pub struct RodioPlayer {
    client: Client,
}

impl RodioPlayer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn fetch(client: &Client, url: &Url) -> Result<Vec<u8>, HealbotError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| HealbotError::ServiceUnreachable(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(HealbotError::ServiceUnreachable(format!(
            "HTTP error! status: {}",
            status.as_u16()
        )));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| HealbotError::ServiceUnreachable(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Decode `audio` and block until it has played out.
fn play_to_end(audio: Vec<u8>) -> Result<(), HealbotError> {
    let source = Decoder::new(Cursor::new(audio))
        .map_err(|e| HealbotError::Protocol(format!("Unsupported reply audio: {}", e)))?;
    let (_stream, handle) = OutputStream::try_default()
        .map_err(|e| HealbotError::DeviceUnavailable(format!("No audio output: {}", e)))?;
    let sink = Sink::try_new(&handle)
        .map_err(|e| HealbotError::DeviceUnavailable(format!("Cannot open output: {}", e)))?;
    sink.append(source);
    sink.play();
    sink.sleep_until_end();
    Ok(())
}

#[async_trait]
impl AudioPlayer for RodioPlayer {
    async fn play(&self, url: &Url) -> Result<(), HealbotError> {
        let audio = fetch(&self.client, url).await?;
        debug!(%url, bytes = audio.len(), "Reply audio fetched");

        let url = url.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = play_to_end(audio) {
                warn!(%url, error = %e, "Reply audio playback failed");
            }
        });
        Ok(())
    }
}
