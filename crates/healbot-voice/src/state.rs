//! Capture state machine with thread-safe transitions.
//!
//! Valid transitions for the recording lifecycle:
//! - Idle -> Recording (microphone acquired)
//! - Recording -> Finalizing (stopped with captured audio)
//! - Recording -> Idle (stopped with nothing captured, or cancelled)
//! - Finalizing -> Idle (payload handed off)

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use healbot_core::error::HealbotError;

/// Operational state of the voice recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    /// No capture in progress. Ready to start.
    Idle,
    /// Microphone held, fragments accumulating.
    Recording,
    /// Recording stopped; the finalized payload is being delivered.
    Finalizing,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Idle => write!(f, "Idle"),
            CaptureState::Recording => write!(f, "Recording"),
            CaptureState::Finalizing => write!(f, "Finalizing"),
        }
    }
}

impl CaptureState {
    pub fn can_transition_to(&self, target: &CaptureState) -> bool {
        matches!(
            (self, target),
            (CaptureState::Idle, CaptureState::Recording)
                | (CaptureState::Recording, CaptureState::Finalizing)
                | (CaptureState::Finalizing, CaptureState::Idle)
                // Empty stop or cancel
                | (CaptureState::Recording, CaptureState::Idle)
        )
    }
}

/// Shared, validated capture state.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: Arc<Mutex<CaptureState>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CaptureState::Idle)),
        }
    }

    // A poisoned lock still holds a valid state.
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> CaptureState {
        *self.lock()
    }

    /// Attempt to transition to `target`, rejecting moves the lifecycle
    /// does not allow.
    pub fn transition(&self, target: CaptureState) -> Result<(), HealbotError> {
        let mut state = self.lock();
        if state.can_transition_to(&target) {
            tracing::debug!("Capture state: {} -> {}", *state, target);
            *state = target;
            Ok(())
        } else {
            Err(HealbotError::InvalidState(format!(
                "Invalid capture transition: {} -> {}",
                *state, target
            )))
        }
    }

    /// Force the machine back to Idle.
    pub fn reset(&self) {
        let mut state = self.lock();
        if *state != CaptureState::Idle {
            tracing::warn!("Capture state machine reset to Idle from {}", *state);
        }
        *state = CaptureState::Idle;
    }
}

// =============================================================================
// Tests
// =============================================================================
