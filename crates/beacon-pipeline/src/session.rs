//! Session lifecycle.
//!
//! Start persists the session before the context swap makes it visible,
//! so nothing can be attributed to a session the store has never heard
//! of. A heartbeat task refreshes `last_heartbeat_time` while the session
//! lives; recovery uses that instant as the best guess for when a dead
//! process actually stopped.

use crate::context::{ActiveSession, SessionContext};
use crate::exporter::export_session;
use crate::{PipelineError, PipelineResult};
use beacon_config::ConfigHandle;
use beacon_core::{PayloadSink, ProcessId, SessionId, SessionRecord, SessionState};
use beacon_storage::BeaconStorage;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Owns session start/end, state transitions and the heartbeat.
pub struct SessionController {
    storage: BeaconStorage,
    context: SessionContext,
    sink: Arc<dyn PayloadSink>,
    config: ConfigHandle,
    process_id: ProcessId,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    started_once: AtomicBool,
}

impl SessionController {
    pub fn new(
        storage: BeaconStorage,
        context: SessionContext,
        sink: Arc<dyn PayloadSink>,
        config: ConfigHandle,
        process_id: ProcessId,
    ) -> Self {
        Self {
            storage,
            context,
            sink,
            config,
            process_id,
            heartbeat: Mutex::new(None),
            started_once: AtomicBool::new(false),
        }
    }

    /// Begin a new session, ending the previous one first if any.
    pub async fn start_session(&self, state: SessionState) -> PipelineResult<SessionId> {
        if self.context.current().is_some() {
            self.end_session().await?;
        }

        let now = Utc::now();
        let record = SessionRecord {
            id: SessionId::random(),
            process_id: self.process_id,
            state,
            trace_id: Uuid::new_v4().simple().to_string(),
            span_id: short_span_id(),
            start_time: now,
            last_heartbeat_time: now,
            end_time: None,
            crash_report_id: None,
            cold_start: !self.started_once.swap(true, Ordering::SeqCst),
            clean_exit: false,
        };

        // persist before the swap: producers must only ever see sessions
        // the store already knows
        self.storage.upsert_session(&record)?;

        self.context.swap(Some(ActiveSession {
            id: record.id,
            state,
            trace_id: record.trace_id.clone(),
            span_id: record.span_id.clone(),
            start_time: record.start_time,
        }));

        self.spawn_heartbeat(record.id);

        info!(session = %record.id, state = state.as_str(), "session started");
        Ok(record.id)
    }

    /// End the active session cleanly and hand its payload to the upload
    /// layer. Returns the ended session's id, or `None` when no session
    /// was active.
    pub async fn end_session(&self) -> PipelineResult<Option<SessionId>> {
        let Some(active) = self.context.swap(None) else {
            return Ok(None);
        };
        self.stop_heartbeat();

        self.storage.set_session_end(active.id, Utc::now())?;

        match self.storage.fetch_session(active.id)? {
            Some(record) => {
                // a refused payload is not fatal: the session stays stored
                // and the next launch sweeps it up
                if let Err(err) = export_session(&self.storage, self.sink.as_ref(), &record).await {
                    warn!(session = %active.id, %err, "session payload deferred to next launch");
                }
            }
            None => {
                return Err(PipelineError::Storage(beacon_storage::StorageError::NotFound(
                    format!("session {}", active.id),
                )))
            }
        }

        info!(session = %active.id, "session ended");
        Ok(Some(active.id))
    }

    /// Foreground/background transition for the active session.
    pub fn transition_state(&self, state: SessionState) {
        self.context.set_state(state);
        if let Some(id) = self.context.current().map(|s| s.id) {
            if let Err(err) = self.storage.update_session_state(id, state) {
                warn!(session = %id, %err, "failed to persist session state");
            }
        }
    }

    pub fn context(&self) -> SessionContext {
        self.context.clone()
    }

    fn spawn_heartbeat(&self, id: SessionId) {
        let storage = self.storage.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(config.session_limits().heartbeat_interval()).await;
                if let Err(err) = storage.update_heartbeat(id, Utc::now()) {
                    warn!(session = %id, %err, "heartbeat write failed");
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
        debug!(session = %id, "heartbeat armed");
    }

    fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

fn short_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}
