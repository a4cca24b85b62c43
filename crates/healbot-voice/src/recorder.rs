//! Voice recorder driving one capture session at a time.
//!
//! The `VoiceRecorder` acquires the microphone, buffers fragments in arrival
//! order, and on stop concatenates them into a single [`AudioPayload`]. The
//! payload is returned inside a [`FinalizedAudio`] whose drop completes the
//! `Finalizing -> Idle` transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use healbot_core::config::VoiceConfig;
use healbot_core::error::HealbotError;
use healbot_core::types::AudioPayload;

use crate::device::{CaptureStream, Microphone, MicrophoneLease};
use crate::state::{CaptureState, StateMachine};

/// Data owned by an active recording.
#[derive(Debug)]
struct Recording {
    id: Uuid,
    started_at: DateTime<Utc>,
    lease: MicrophoneLease,
    fragments: Vec<Vec<u8>>,
}

impl Recording {
    fn new(lease: MicrophoneLease) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            lease,
            fragments: Vec::new(),
        }
    }

    fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

/// Marks the recorder Idle again when the finalized payload is dropped.
#[derive(Debug)]
struct FinalizeGuard {
    machine: StateMachine,
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if let Err(e) = self.machine.transition(CaptureState::Idle) {
            tracing::warn!(error = %e, "Failed to leave Finalizing state");
            self.machine.reset();
        }
    }
}

/// A finished recording ready for upload.
///
/// The recorder stays in `Finalizing` (refusing new recordings) until this
/// value is dropped.
#[derive(Debug)]
pub struct FinalizedAudio {
    recording_id: Uuid,
    payload: AudioPayload,
    _guard: FinalizeGuard,
}

impl FinalizedAudio {
    pub fn recording_id(&self) -> Uuid {
        self.recording_id
    }

    pub fn payload(&self) -> &AudioPayload {
        &self.payload
    }
}

/// Records voice messages from a [`Microphone`].
pub struct VoiceRecorder {
    machine: StateMachine,
    microphone: Arc<dyn Microphone>,
    recording: Mutex<Option<Recording>>,
    acquiring: AtomicBool,
    mime_type: String,
    file_name: String,
}

impl std::fmt::Debug for VoiceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceRecorder")
            .field("state", &self.machine.current())
            .field("mime_type", &self.mime_type)
            .field("file_name", &self.file_name)
            .finish()
    }
}

impl VoiceRecorder {
    pub fn new(microphone: Arc<dyn Microphone>, config: &VoiceConfig) -> Self {
        Self {
            machine: StateMachine::new(),
            microphone,
            recording: Mutex::new(None),
            acquiring: AtomicBool::new(false),
            mime_type: config.mime_type.clone(),
            file_name: config.file_name.clone(),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.machine.current()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    fn slot(&self) -> Result<MutexGuard<'_, Option<Recording>>, HealbotError> {
        self.recording
            .lock()
            .map_err(|e| HealbotError::InvalidState(format!("Recording mutex poisoned: {}", e)))
    }

    /// Acquire the microphone and enter `Recording`.
    ///
    /// Rejected unless the recorder is Idle. If acquisition fails the
    /// recorder stays Idle and the device error is returned.
    pub async fn start(&self) -> Result<Uuid, HealbotError> {
        let current = self.machine.current();
        if current != CaptureState::Idle {
            return Err(HealbotError::InvalidState(format!(
                "Cannot start recording from {} state",
                current
            )));
        }
        if self.acquiring.swap(true, Ordering::SeqCst) {
            return Err(HealbotError::InvalidState(
                "Microphone acquisition already in progress".to_string(),
            ));
        }

        let acquired = self.microphone.acquire().await;
        let result = self.begin(acquired);
        self.acquiring.store(false, Ordering::SeqCst);
        result
    }

    fn begin(
        &self,
        acquired: Result<Box<dyn CaptureStream>, HealbotError>,
    ) -> Result<Uuid, HealbotError> {
        let stream = acquired.inspect_err(|e| {
            tracing::warn!(error = %e, "Microphone acquisition failed");
        })?;
        // Dropping the lease on any early return gives the device back.
        let lease = MicrophoneLease::new(stream);
        self.machine.transition(CaptureState::Recording)?;

        let recording = Recording::new(lease);
        let id = recording.id;
        match self.slot() {
            Ok(mut slot) => *slot = Some(recording),
            Err(e) => {
                self.machine.reset();
                return Err(e);
            }
        }
        tracing::info!(recording_id = %id, "Recording started");
        Ok(id)
    }

    /// Append a captured fragment. Empty fragments are skipped.
    pub fn push_fragment(&self, fragment: &[u8]) -> Result<(), HealbotError> {
        if self.machine.current() != CaptureState::Recording {
            return Err(HealbotError::InvalidState(
                "Cannot push audio: not in Recording state".to_string(),
            ));
        }
        if fragment.is_empty() {
            return Ok(());
        }
        let mut slot = self.slot()?;
        match slot.as_mut() {
            Some(recording) => {
                recording.fragments.push(fragment.to_vec());
                Ok(())
            }
            None => Err(HealbotError::InvalidState(
                "No active recording to push audio to".to_string(),
            )),
        }
    }

    /// Stop recording and finalize the captured audio.
    ///
    /// The microphone is released before anything else can fail. Returns
    /// `None` (back to Idle) when nothing was captured.
    pub async fn stop(&self) -> Result<Option<FinalizedAudio>, HealbotError> {
        let current = self.machine.current();
        if current != CaptureState::Recording {
            return Err(HealbotError::InvalidState(format!(
                "Cannot stop recording from {} state",
                current
            )));
        }
        let mut recording = self.slot()?.take().ok_or_else(|| {
            HealbotError::InvalidState("No active recording to stop".to_string())
        })?;

        let tail = recording.lease.finish().await;
        recording.lease.release();
        match tail {
            Ok(fragments) => recording
                .fragments
                .extend(fragments.into_iter().filter(|f| !f.is_empty())),
            Err(e) => {
                tracing::warn!(
                    recording_id = %recording.id,
                    error = %e,
                    "Failed to flush capture stream"
                );
            }
        }

        let data = recording.fragments.concat();
        if data.is_empty() {
            self.machine.transition(CaptureState::Idle)?;
            tracing::info!(recording_id = %recording.id, "Recording stopped with no audio");
            return Ok(None);
        }

        self.machine.transition(CaptureState::Finalizing)?;
        tracing::info!(
            recording_id = %recording.id,
            fragments = recording.fragments.len(),
            bytes = data.len(),
            elapsed_ms = recording.elapsed_ms(),
            "Recording finalized"
        );
        Ok(Some(FinalizedAudio {
            recording_id: recording.id,
            payload: AudioPayload::new(data, self.mime_type.clone(), self.file_name.clone()),
            _guard: FinalizeGuard {
                machine: self.machine.clone(),
            },
        }))
    }

    /// Abandon the recording, discarding everything captured.
    pub fn cancel(&self) -> Result<(), HealbotError> {
        let current = self.machine.current();
        if current != CaptureState::Recording {
            return Err(HealbotError::InvalidState(format!(
                "Cannot cancel recording from {} state",
                current
            )));
        }
        let recording = self.slot()?.take();
        self.machine.transition(CaptureState::Idle)?;
        if let Some(mut recording) = recording {
            recording.lease.release();
            tracing::info!(recording_id = %recording.id, "Recording cancelled");
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
