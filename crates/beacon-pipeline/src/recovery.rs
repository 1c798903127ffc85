//! Next-launch recovery.
//!
//! Runs once at process start, before normal ingestion resumes: crash
//! reports are reconciled with the sessions the previous process left in
//! the store, truncated spans get synthesized end times, and everything a
//! dead process never shipped — sessions, logs, metadata garbage — is
//! queued for upload or collected.

use crate::exporter::{export_log_batch, export_session};
use crate::payload::{self, CrashPayload};
use crate::PipelineResult;
use beacon_core::{
    CrashReport, CrashReporter, LogRecord, PayloadSink, ProcessId, SessionRecord, UploadKind,
};
use beacon_config::ConfigHandle;
use beacon_storage::BeaconStorage;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// What one recovery pass accomplished.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub crashes_uploaded: usize,
    pub crashes_unassociated: usize,
    pub crashes_ignored: usize,
    pub sessions_uploaded: usize,
    pub log_batches_uploaded: usize,
    pub spans_closed: usize,
    pub metadata_removed: usize,
}

/// Reconciles crash reports with stored sessions and sweeps unsent data.
pub struct CrashCorrelator {
    storage: BeaconStorage,
    sink: Arc<dyn PayloadSink>,
    reporter: Arc<dyn CrashReporter>,
    config: ConfigHandle,
    process_id: ProcessId,
}

impl CrashCorrelator {
    pub fn new(
        storage: BeaconStorage,
        sink: Arc<dyn PayloadSink>,
        reporter: Arc<dyn CrashReporter>,
        config: ConfigHandle,
        process_id: ProcessId,
    ) -> Self {
        Self {
            storage,
            sink,
            reporter,
            config,
            process_id,
        }
    }

    /// The whole recovery pass. Individual failures are logged and the
    /// pass continues; whatever could not ship this time is still stored
    /// and the next launch tries again.
    pub async fn recover_and_queue(&self) -> PipelineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        let crashes = match self.reporter.fetch_unsent_reports().await {
            Ok(crashes) => crashes,
            Err(err) => {
                warn!(%err, "could not fetch unsent crash reports");
                Vec::new()
            }
        };

        let ignore_list = self.config.crash_signal_ignore_list();
        for crash in crashes {
            if ignore_list.contains(&crash.signal) {
                // deliberate termination: delete, never upload
                if let Err(err) = self.reporter.delete_report(&crash.id).await {
                    warn!(report = %crash.id, %err, "failed to delete ignored crash report");
                }
                report.crashes_ignored += 1;
                continue;
            }

            self.handle_crash(crash, &mut report).await?;
        }

        self.sweep_unsent(&mut report).await?;

        info!(?report, "recovery pass finished");
        Ok(report)
    }

    async fn handle_crash(
        &self,
        crash: CrashReport,
        report: &mut RecoveryReport,
    ) -> PipelineResult<()> {
        let session = self.resolve_session(&crash)?;

        let session_id = match &session {
            Some(session) => {
                let crash_time = crash.timestamp.unwrap_or(session.last_heartbeat_time);
                self.storage
                    .set_crash_ended(session.id, crash_time, &crash.id)?;

                // the crash truncated whatever was in flight; give every
                // open span a well-formed, failed ending
                let end = self
                    .storage
                    .fetch_session(session.id)?
                    .map(|s| s.effective_end())
                    .unwrap_or(crash_time);
                report.spans_closed += self
                    .storage
                    .close_open_spans_for_session(session.id, end)?;

                Some(session.id)
            }
            None => None,
        };

        let bytes = payload::encode(&CrashPayload::new(&crash, session_id))?;
        match self
            .sink
            .submit(crash.id.clone(), UploadKind::Blob, bytes)
            .await
        {
            Ok(()) => {
                // the upload layer caches it from here on
                if let Err(err) = self.reporter.delete_report(&crash.id).await {
                    warn!(report = %crash.id, %err, "failed to delete uploaded crash report");
                }
                report.crashes_uploaded += 1;
                if session_id.is_none() {
                    report.crashes_unassociated += 1;
                }
            }
            Err(err) => {
                warn!(report = %crash.id, %err, "crash report upload deferred");
            }
        }

        Ok(())
    }

    /// Find the session that was active when the crash happened: an
    /// explicit id wins; otherwise the most recent session whose
    /// `[start, last-heartbeat]` interval comes within the grace window of
    /// the crash timestamp, tie-broken by heartbeat proximity. Proximity
    /// to either end of the interval qualifies, which can double-match a
    /// very short session against an adjacent long one; the tie-break
    /// decides those cases.
    fn resolve_session(&self, crash: &CrashReport) -> PipelineResult<Option<SessionRecord>> {
        if let Some(id) = crash.session_id {
            return Ok(self.storage.fetch_session(id)?);
        }

        let Some(crash_time) = crash.timestamp else {
            return Ok(None);
        };

        let grace =
            Duration::milliseconds(self.config.session_limits().crash_grace_window_ms as i64);
        let candidates = self.storage.fetch_sessions_around(crash_time, grace)?;

        Ok(candidates
            .into_iter()
            .min_by_key(|session| (crash_time - session.last_heartbeat_time).abs()))
    }

    /// Ship everything the previous processes never did: close leftover
    /// open spans, upload dead sessions, re-batch orphaned logs, collect
    /// metadata garbage.
    async fn sweep_unsent(&self, report: &mut RecoveryReport) -> PipelineResult<()> {
        // close remaining open spans of dead processes, dated to the last
        // sign of life the store has
        let sweep_end = self
            .storage
            .fetch_latest_session()?
            .map(|s| s.effective_end())
            .unwrap_or_else(Utc::now);
        report.spans_closed += self.storage.close_open_spans(sweep_end, self.process_id)?;

        for session in self.storage.fetch_all_sessions()? {
            if session.process_id == self.process_id {
                continue;
            }
            match export_session(&self.storage, self.sink.as_ref(), &session).await {
                Ok(()) => report.sessions_uploaded += 1,
                Err(err) => {
                    warn!(session = %session.id, %err, "dead session upload deferred")
                }
            }
        }

        let oldest = self.storage.fetch_oldest_session()?;
        self.storage.clean_old_spans(oldest.map(|s| s.start_time))?;

        // orphaned logs re-batch by the size rule alone; age no longer
        // means anything for a dead process
        let orphans = self.storage.fetch_logs_excluding_process(self.process_id)?;
        let max_records = self.config.batch_limits().max_records_per_batch;
        for chunk in divide_in_batches(orphans, max_records) {
            if export_log_batch(&self.storage, self.sink.as_ref(), chunk).await {
                report.log_batches_uploaded += 1;
            }
        }

        report.metadata_removed += self.storage.clean_metadata(self.process_id)?;
        Ok(())
    }
}

fn divide_in_batches(logs: Vec<LogRecord>, max_records: usize) -> Vec<Vec<LogRecord>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();

    for log in logs {
        current.push(log);
        if current.len() >= max_records.max(1) {
            batches.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
