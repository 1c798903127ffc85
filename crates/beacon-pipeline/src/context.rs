//! The shared "current session" context.
//!
//! Every producer-facing call needs to know the active session; instead of
//! a singleton read from arbitrary call sites, this handle is passed by
//! reference into the classifier at construction and replaced with an
//! atomic swap on session transitions.

use beacon_core::{SessionId, SessionState, SessionStateProvider};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// The session currently being recorded against.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub id: SessionId,
    pub state: SessionState,
    pub trace_id: String,
    pub span_id: String,
    pub start_time: DateTime<Utc>,
}

/// Cheaply cloneable handle to the active session, if any.
#[derive(Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<ActiveSession>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the active session, returning the previous one.
    pub fn swap(&self, session: Option<ActiveSession>) -> Option<ActiveSession> {
        std::mem::replace(&mut *self.inner.write(), session)
    }

    /// Snapshot of the active session.
    pub fn current(&self) -> Option<ActiveSession> {
        self.inner.read().clone()
    }

    /// Update the foreground/background state in place. No-op without an
    /// active session.
    pub fn set_state(&self, state: SessionState) {
        if let Some(active) = self.inner.write().as_mut() {
            active.state = state;
        }
    }
}

impl SessionStateProvider for SessionContext {
    fn current_session_id(&self) -> Option<SessionId> {
        self.inner.read().as_ref().map(|s| s.id)
    }

    fn current_state(&self) -> Option<SessionState> {
        self.inner.read().as_ref().map(|s| s.state)
    }
}
