//! Reply audio for builds without an audio device: downloads the synthesized
//! audio next to the identity database so it can be opened with any player.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::{info, warn};

use healbot_chat::AudioPlayer;
use healbot_core::error::HealbotError;

const FALLBACK_FILE_NAME: &str = "reply.mp3";

#[derive(Debug, Clone)]
pub struct DownloadPlayer {
    client: Client,
    dir: PathBuf,
}

impl DownloadPlayer {
    pub fn new(client: Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path the audio at `url` is written to.
    pub fn target_for(&self, url: &Url) -> PathBuf {
        let name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or(FALLBACK_FILE_NAME);
        self.dir.join(name)
    }
}

async fn download(client: Client, url: Url, target: PathBuf) -> Result<(), HealbotError> {
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
    tokio::fs::write(&target, &bytes).await?;
    Ok(())
}

#[async_trait]
impl AudioPlayer for DownloadPlayer {
    async fn play(&self, url: &Url) -> Result<(), HealbotError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.target_for(url);

        let client = self.client.clone();
        let url = url.clone();
        tokio::spawn(async move {
            match download(client, url.clone(), target.clone()).await {
                Ok(()) => info!(%url, path = %target.display(), "Reply audio saved"),
                Err(e) => warn!(%url, error = %e, "Reply audio download failed"),
            }
        });
        Ok(())
    }
}
