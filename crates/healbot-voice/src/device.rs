//! Microphone abstraction and scoped acquisition.
//!
//! A [`Microphone`] hands out a [`CaptureStream`] while it holds the device.
//! The recorder wraps every stream in a [`MicrophoneLease`] so the device is
//! given back exactly once, whichever way the recording ends.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use healbot_core::error::HealbotError;

// =============================================================================
// Traits
// =============================================================================

/// A live capture from an acquired microphone.
#[async_trait]
pub trait CaptureStream: Send {
    /// Stop producing audio and return the fragments not delivered yet,
    /// in capture order.
    async fn finish(&mut self) -> Result<Vec<Vec<u8>>, HealbotError>;

    /// Give the device back.
    fn release(&mut self);
}

/// An exclusively held audio input device.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire the device and start capturing.
    ///
    /// Fails with `DeviceUnavailable` when permission is denied or the
    /// hardware cannot be opened.
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, HealbotError>;
}

// =============================================================================
// Lease
// =============================================================================

/// Owns a capture stream and releases it exactly once: on an explicit
/// [`release`](Self::release) or when dropped.
pub struct MicrophoneLease {
    stream: Option<Box<dyn CaptureStream>>,
}

impl MicrophoneLease {
    pub fn new(stream: Box<dyn CaptureStream>) -> Self {
        Self {
            stream: Some(stream),
        }
    }

    pub fn is_held(&self) -> bool {
        self.stream.is_some()
    }

    /// Flush the stream. A released lease has nothing left to give.
    pub async fn finish(&mut self) -> Result<Vec<Vec<u8>>, HealbotError> {
        match self.stream.as_mut() {
            Some(stream) => stream.finish().await,
            None => Ok(Vec::new()),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            debug!("Microphone released");
        }
    }
}

impl Drop for MicrophoneLease {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for MicrophoneLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicrophoneLease")
            .field("held", &self.is_held())
            .finish()
    }
}

// =============================================================================
// Mock implementation
// =============================================================================

#[derive(Debug, Default)]
struct MockMicrophoneState {
    denied: AtomicBool,
    fail_finish: AtomicBool,
    held: AtomicBool,
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    tail: Mutex<Vec<Vec<u8>>>,
}

/// Mock microphone for tests.
///
/// Counts acquisitions and releases, can be told to deny access, and
/// yields a scripted set of trailing fragments when a stream finishes.
#[derive(Debug, Clone, Default)]
pub struct MockMicrophone {
    state: Arc<MockMicrophoneState>,
}

impl MockMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// A microphone whose permission prompt is always declined.
    pub fn denied() -> Self {
        let mic = Self::new();
        mic.set_denied(true);
        mic
    }

    pub fn set_denied(&self, denied: bool) {
        self.state.denied.store(denied, Ordering::SeqCst);
    }

    /// Make the next stream's flush fail.
    pub fn set_fail_finish(&self, fail: bool) {
        self.state.fail_finish.store(fail, Ordering::SeqCst);
    }

    /// Fragments the next stream delivers when it finishes.
    pub fn set_tail(&self, fragments: Vec<Vec<u8>>) {
        *self.state.tail.lock().unwrap_or_else(|e| e.into_inner()) = fragments;
    }

    pub fn is_held(&self) -> bool {
        self.state.held.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Microphone for MockMicrophone {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, HealbotError> {
        if self.state.denied.load(Ordering::SeqCst) {
            return Err(HealbotError::DeviceUnavailable(
                "Permission denied".to_string(),
            ));
        }
        if self.state.held.swap(true, Ordering::SeqCst) {
            return Err(HealbotError::DeviceUnavailable(
                "Microphone is already in use".to_string(),
            ));
        }
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockStream {
    state: Arc<MockMicrophoneState>,
}

#[async_trait]
impl CaptureStream for MockStream {
    async fn finish(&mut self) -> Result<Vec<Vec<u8>>, HealbotError> {
        if self.state.fail_finish.load(Ordering::SeqCst) {
            return Err(HealbotError::DeviceUnavailable(
                "Capture stream failed".to_string(),
            ));
        }
        let mut tail = self.state.tail.lock().unwrap_or_else(|e| e.into_inner());
        Ok(std::mem::take(&mut *tail))
    }

    fn release(&mut self) {
        self.state.held.store(false, Ordering::SeqCst);
        self.state.releases.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// File-backed implementation
// =============================================================================

/// Microphone that "records" the contents of an audio file.
///
/// The file is read when the device is acquired and delivered as
/// fixed-size fragments when the capture finishes.
#[derive(Debug)]
pub struct FileMicrophone {
    source: Mutex<Option<PathBuf>>,
    fragment_bytes: usize,
}

impl FileMicrophone {
    pub fn new(fragment_bytes: usize) -> Self {
        Self {
            source: Mutex::new(None),
            fragment_bytes: fragment_bytes.max(1),
        }
    }

    /// Choose the file the next capture reads.
    pub fn set_source(&self, path: impl AsRef<Path>) {
        *self.source.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.as_ref().to_path_buf());
    }

    pub fn source(&self) -> Option<PathBuf> {
        self.source.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Microphone for FileMicrophone {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, HealbotError> {
        let path = self.source().ok_or_else(|| {
            HealbotError::DeviceUnavailable("No audio source selected".to_string())
        })?;
        let data = tokio::fs::read(&path).await.map_err(|e| {
            HealbotError::DeviceUnavailable(format!("Cannot open {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), bytes = data.len(), "Audio source opened");
        let fragments = data
            .chunks(self.fragment_bytes)
            .map(<[u8]>::to_vec)
            .collect();
        Ok(Box::new(FileStream { path, fragments }))
    }
}

struct FileStream {
    path: PathBuf,
    fragments: Vec<Vec<u8>>,
}

#[async_trait]
impl CaptureStream for FileStream {
    async fn finish(&mut self) -> Result<Vec<Vec<u8>>, HealbotError> {
        Ok(std::mem::take(&mut self.fragments))
    }

    fn release(&mut self) {
        debug!(path = %self.path.display(), "Audio source closed");
    }
}

// =============================================================================
// Tests
// =============================================================================
