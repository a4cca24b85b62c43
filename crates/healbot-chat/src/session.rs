//! Session manager: owns the live session identifier.
//!
//! The identifier is only ever taken from service responses. Every
//! successful create, resume or exchange overwrites it (last writer wins),
//! and whenever a patient is bound the new value is written through to the
//! identity store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use healbot_client::RemoteService;
use healbot_core::error::HealbotError;
use healbot_core::types::{SessionId, SessionSnapshot};
use healbot_storage::IdentityStore;

use crate::error::ChatError;

#[derive(Debug, Default)]
struct SessionState {
    patient: Option<String>,
    current: Option<SessionId>,
    epoch: Epoch,
}

/// Generation of the patient binding.
///
/// Bumped whenever the patient is rebound or the session is forgotten.
/// Identifiers reported by requests started under an older epoch are not
/// adopted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(u64);

/// A bound patient and the epoch the binding opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub epoch: Epoch,
}

/// Exclusive right to resume a session.
///
/// Held for the whole identity flow so a second resume is turned away
/// before it can rebind the patient. Dropping it frees the slot.
pub struct ResumeSlot<'a> {
    manager: &'a SessionManager,
}

impl ResumeSlot<'_> {
    /// Fetch an existing session's history and make it current.
    ///
    /// `NotFound` is returned as-is; callers fall back to
    /// [`SessionManager::create_session`]. A snapshot that arrives after the
    /// patient was rebound is dropped with [`ChatError::Superseded`].
    pub async fn resume(
        &self,
        id: &SessionId,
        epoch: Epoch,
    ) -> Result<SessionSnapshot, ChatError> {
        let snapshot = self.manager.service.fetch_session(id).await?;
        self.manager.adopt(&snapshot.session_id, epoch)?;
        info!(
            session_id = %snapshot.session_id,
            messages = snapshot.messages.len(),
            "Session resumed"
        );
        Ok(snapshot)
    }
}

impl Drop for ResumeSlot<'_> {
    fn drop(&mut self) {
        self.manager.resuming.store(false, Ordering::SeqCst);
    }
}

pub struct SessionManager {
    service: Arc<dyn RemoteService>,
    identity: Arc<dyn IdentityStore>,
    state: Mutex<SessionState>,
    resuming: AtomicBool,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("resuming", &self.resuming.load(Ordering::SeqCst))
            .finish()
    }
}

impl SessionManager {
    pub fn new(service: Arc<dyn RemoteService>, identity: Arc<dyn IdentityStore>) -> Self {
        Self {
            service,
            identity,
            state: Mutex::new(SessionState::default()),
            resuming: AtomicBool::new(false),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, SessionState>, ChatError> {
        self.state.lock().map_err(|e| {
            HealbotError::InvalidState(format!("session lock poisoned: {}", e)).into()
        })
    }

    /// Associate later sessions with `name`.
    ///
    /// Rebinding abandons whatever session was active; nothing is closed on
    /// the service side. The returned binding carries the trimmed name.
    pub fn bind_patient(&self, name: &str) -> Result<Binding, ChatError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyPatientName);
        }
        let mut state = self.state()?;
        if let Some(abandoned) = state.current.take() {
            debug!(session_id = %abandoned, "Abandoning session on patient rebind");
        }
        state.patient = Some(name.to_string());
        state.epoch = Epoch(state.epoch.0 + 1);
        info!(patient = %name, "Patient bound");
        Ok(Binding {
            name: name.to_string(),
            epoch: state.epoch,
        })
    }

    pub fn patient(&self) -> Option<String> {
        self.state().ok().and_then(|s| s.patient.clone())
    }

    pub fn current(&self) -> Option<SessionId> {
        self.state().ok().and_then(|s| s.current.clone())
    }

    pub fn epoch(&self) -> Result<Epoch, ChatError> {
        Ok(self.state()?.epoch)
    }

    /// The live session together with the epoch it belongs to.
    pub fn current_with_epoch(&self) -> Result<(Option<SessionId>, Epoch), ChatError> {
        let state = self.state()?;
        Ok((state.current.clone(), state.epoch))
    }

    /// Whether nothing was rebound or forgotten since `epoch`.
    pub fn is_live(&self, epoch: Epoch) -> bool {
        self.state().map(|s| s.epoch == epoch).unwrap_or(false)
    }

    /// The most recently used patient name, if one was ever saved.
    pub fn last_patient_name(&self) -> Result<Option<String>, ChatError> {
        Ok(self.identity.last_name()?)
    }

    pub fn remember_patient_name(&self, name: &str) -> Result<(), ChatError> {
        Ok(self.identity.save_name(name)?)
    }

    /// The identifier stored for the bound patient.
    pub fn stored_session(&self) -> Result<Option<SessionId>, ChatError> {
        let patient = self.patient().ok_or(ChatError::NoPatient)?;
        Ok(self.identity.session_for(&patient)?)
    }

    /// Claim the single resume slot.
    pub fn begin_resume(&self) -> Result<ResumeSlot<'_>, ChatError> {
        if self.resuming.swap(true, Ordering::SeqCst) {
            return Err(ChatError::ResumeInProgress);
        }
        Ok(ResumeSlot { manager: self })
    }

    /// Ask the service for a brand-new session and make it current.
    pub async fn create_session(&self, epoch: Epoch) -> Result<SessionId, ChatError> {
        let id = self.service.create_session().await?;
        self.adopt(&id, epoch)?;
        info!(session_id = %id, "New session started");
        Ok(id)
    }

    /// Resume `id` in a slot of its own. Only one resume may run at a time.
    pub async fn resume_session(
        &self,
        id: &SessionId,
        epoch: Epoch,
    ) -> Result<SessionSnapshot, ChatError> {
        let slot = self.begin_resume()?;
        slot.resume(id, epoch).await
    }

    /// Take the identifier a completed exchange reported.
    ///
    /// Returns `false` when the exchange was started under an older epoch;
    /// its identifier is then ignored.
    pub fn reconcile(&self, id: &SessionId, epoch: Epoch) -> Result<bool, ChatError> {
        let (previous, live) = {
            let state = self.state()?;
            (state.current.clone(), state.epoch == epoch)
        };
        if !live {
            debug!(session_id = %id, "Ignoring identifier from a superseded exchange");
            return Ok(false);
        }
        if previous.as_ref() == Some(id) {
            return Ok(true);
        }
        match &previous {
            Some(old) => info!(from = %old, to = %id, "Service rotated session identifier"),
            None => info!(session_id = %id, "Service opened session during exchange"),
        }
        match self.adopt(id, epoch) {
            Ok(()) => Ok(true),
            Err(ChatError::Superseded) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Drop the live session and the bound patient's stored identifier.
    pub fn forget(&self) -> Result<Option<SessionId>, ChatError> {
        let (patient, previous) = {
            let mut state = self.state()?;
            state.epoch = Epoch(state.epoch.0 + 1);
            (state.patient.clone(), state.current.take())
        };
        if let Some(patient) = patient {
            self.identity.forget_session_for(&patient)?;
            debug!(patient = %patient, "Forgot stored session");
        }
        Ok(previous)
    }

    /// Make `id` current for the patient bound at `epoch`.
    fn adopt(&self, id: &SessionId, epoch: Epoch) -> Result<(), ChatError> {
        let patient = {
            let mut state = self.state()?;
            if state.epoch != epoch {
                debug!(session_id = %id, "Patient changed while the request was in flight");
                return Err(ChatError::Superseded);
            }
            state.current = Some(id.clone());
            state.patient.clone()
        };
        if let Some(patient) = patient {
            // The live session stays usable even when the write fails.
            if let Err(e) = self.identity.save_session_for(&patient, id) {
                warn!(
                    patient = %patient,
                    session_id = %id,
                    error = %e,
                    "Failed to persist session"
                );
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
