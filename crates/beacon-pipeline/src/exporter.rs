//! Closed-batch export.
//!
//! Consumes closed batches from the batchers, wraps them in payload
//! envelopes, and hands them to the payload sink. Log records are deleted
//! from the durable store once the sink has taken custody; span records
//! stay until their owning session ships.

use crate::payload::{self, LogsPayload, SessionPayload, SpansPayload};
use crate::PipelineResult;
use beacon_core::{LogRecord, PayloadSink, SessionRecord, SpanRecord, SpanType, UploadKind};
use beacon_storage::BeaconStorage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bridges the batchers to the payload sink.
pub struct SignalExporter;

impl SignalExporter {
    /// Spawn one worker per signal kind. Each worker runs until its batch
    /// channel closes.
    pub fn spawn(
        storage: BeaconStorage,
        sink: Arc<dyn PayloadSink>,
        mut log_batches: mpsc::UnboundedReceiver<Vec<LogRecord>>,
        mut span_batches: mpsc::UnboundedReceiver<Vec<SpanRecord>>,
    ) {
        {
            let storage = storage.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                while let Some(batch) = log_batches.recv().await {
                    export_log_batch(&storage, sink.as_ref(), batch).await;
                }
                debug!("log exporter stopped");
            });
        }

        tokio::spawn(async move {
            while let Some(batch) = span_batches.recv().await {
                export_span_batch(sink.as_ref(), batch).await;
            }
            debug!("span exporter stopped");
        });
    }
}

/// Returns `true` once the upload layer has taken custody of the batch.
pub(crate) async fn export_log_batch(
    storage: &BeaconStorage,
    sink: &dyn PayloadSink,
    batch: Vec<LogRecord>,
) -> bool {
    if batch.is_empty() {
        return false;
    }

    // metadata travels with the batch's session, when it still exists
    let metadata = match batch[0].session_id {
        Some(session_id) => match storage.fetch_session(session_id) {
            Ok(Some(session)) => storage
                .fetch_metadata_for_session(&session)
                .unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!(%err, "failed to load session for log batch");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    let ids: Vec<Uuid> = batch.iter().map(|log| log.id).collect();
    let payload = LogsPayload {
        logs: batch,
        metadata,
    };

    let bytes = match payload::encode(&payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            // malformed data is dropped at export time, never retried
            warn!(%err, "dropping undecodable log batch");
            if let Err(err) = storage.delete_logs(&ids) {
                warn!(%err, "failed to drop undecodable logs");
            }
            return false;
        }
    };

    match sink
        .submit(Uuid::new_v4().to_string(), UploadKind::Logs, bytes)
        .await
    {
        Ok(()) => {
            // custody transferred; the store no longer owns these
            if let Err(err) = storage.delete_logs(&ids) {
                warn!(%err, "failed to delete delivered logs");
            }
            true
        }
        Err(err) => {
            // records stay stored; the next launch re-batches them
            warn!(%err, "log batch not accepted by upload layer");
            false
        }
    }
}

async fn export_span_batch(sink: &dyn PayloadSink, batch: Vec<SpanRecord>) {
    // the session root span is finalized by the session controller only
    let spans: Vec<SpanRecord> = batch
        .into_iter()
        .filter(|span| span.span_type != SpanType::Session)
        .collect();
    if spans.is_empty() {
        return;
    }

    let payload = SpansPayload { spans };
    let bytes = match payload::encode(&payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "dropping undecodable span batch");
            return;
        }
    };

    if let Err(err) = sink
        .submit(Uuid::new_v4().to_string(), UploadKind::Spans, bytes)
        .await
    {
        warn!(%err, "span batch not accepted by upload layer");
    }
}

/// Export one finished session: build its envelope, hand it to the sink,
/// and — once custody transferred — delete the session, its spans, and
/// anything made unreachable by its departure.
pub async fn export_session(
    storage: &BeaconStorage,
    sink: &dyn PayloadSink,
    session: &SessionRecord,
) -> PipelineResult<()> {
    let mut spans = storage.fetch_spans_for_session(session.id)?;
    spans.insert(0, payload::session_root_span(session));
    let metadata = storage.fetch_metadata_for_session(session)?;

    let payload = SessionPayload {
        session: session.clone(),
        spans,
        metadata,
    };
    let bytes = payload::encode(&payload)?;

    sink.submit(session.id.to_string(), UploadKind::Session, bytes)
        .await?;

    storage.delete_session(session.id)?;
    storage.delete_spans_for_session(session.id)?;

    let oldest = storage.fetch_oldest_session()?;
    storage.clean_old_spans(oldest.map(|s| s.start_time))?;

    debug!(session = %session.id, "session exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_core::{
        ProcessId, SessionId, SessionState, Severity, SinkError, SpanStatus,
    };
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Records submissions; optionally refuses them.
    #[derive(Default)]
    struct RecordingSink {
        accept: bool,
        submitted: Mutex<Vec<(String, UploadKind, Vec<u8>)>>,
    }

    impl RecordingSink {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                accept: true,
                ..Default::default()
            })
        }

        fn refusing() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn submissions(&self) -> Vec<(String, UploadKind, Vec<u8>)> {
            self.submitted.lock().clone()
        }
    }

    #[async_trait]
    impl PayloadSink for RecordingSink {
        async fn submit(
            &self,
            id: String,
            kind: UploadKind,
            bytes: Vec<u8>,
        ) -> Result<(), SinkError> {
            self.submitted.lock().push((id, kind, bytes));
            if self.accept {
                Ok(())
            } else {
                Err(SinkError::Failure("refused".into()))
            }
        }
    }

    fn stored_session(storage: &BeaconStorage) -> SessionRecord {
        let now = Utc::now();
        let session = SessionRecord {
            id: SessionId::random(),
            process_id: ProcessId::random(),
            state: SessionState::Foreground,
            trace_id: "trace".into(),
            span_id: "root".into(),
            start_time: now,
            last_heartbeat_time: now,
            end_time: Some(now),
            crash_report_id: None,
            cold_start: false,
            clean_exit: true,
        };
        storage.upsert_session(&session).unwrap();
        session
    }

    fn stored_log(storage: &BeaconStorage, session_id: SessionId, body: &str) -> LogRecord {
        let log = LogRecord {
            id: Uuid::new_v4(),
            severity: Severity::Info,
            body: body.into(),
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
            session_id: Some(session_id),
            process_id: ProcessId::random(),
        };
        storage.insert_log(&log).unwrap();
        log
    }

    #[tokio::test]
    async fn delivered_log_batch_is_deleted_from_storage() {
        let storage = BeaconStorage::in_memory().unwrap();
        let session = stored_session(&storage);
        let log = stored_log(&storage, session.id, "a");
        let sink = RecordingSink::accepting();

        export_log_batch(&storage, sink.as_ref(), vec![log]).await;

        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].1, UploadKind::Logs);
        assert!(storage
            .fetch_logs_excluding_process(ProcessId::random())
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn refused_log_batch_stays_in_storage() {
        let storage = BeaconStorage::in_memory().unwrap();
        let session = stored_session(&storage);
        let log = stored_log(&storage, session.id, "a");
        let sink = RecordingSink::refusing();

        export_log_batch(&storage, sink.as_ref(), vec![log]).await;

        assert_eq!(
            storage
                .fetch_logs_excluding_process(ProcessId::random())
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn exported_batch_preserves_log_order() {
        let storage = BeaconStorage::in_memory().unwrap();
        let session = stored_session(&storage);
        let batch = vec![
            stored_log(&storage, session.id, "a"),
            stored_log(&storage, session.id, "b"),
            stored_log(&storage, session.id, "c"),
        ];
        let sink = RecordingSink::accepting();

        export_log_batch(&storage, sink.as_ref(), batch).await;

        let submissions = sink.submissions();
        let value: serde_json::Value = serde_json::from_slice(&submissions[0].2).unwrap();
        let bodies: Vec<&str> = value["logs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|log| log["body"].as_str().unwrap())
            .collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn span_batches_never_carry_the_session_root() {
        let sink = RecordingSink::accepting();
        let root = SpanRecord {
            id: "root".into(),
            trace_id: "t".into(),
            parent_span_id: None,
            name: "session".into(),
            span_type: SpanType::Session,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
            session_id: None,
            process_id: ProcessId::random(),
        };

        export_span_batch(sink.as_ref(), vec![root]).await;

        assert!(sink.submissions().is_empty());
    }

    #[tokio::test]
    async fn export_session_deletes_session_and_spans_after_custody() {
        let storage = BeaconStorage::in_memory().unwrap();
        let session = stored_session(&storage);
        let span = SpanRecord {
            id: "s1".into(),
            trace_id: session.trace_id.clone(),
            parent_span_id: None,
            name: "op".into(),
            span_type: SpanType::Performance,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            status: SpanStatus::Ok,
            attributes: BTreeMap::new(),
            session_id: Some(session.id),
            process_id: session.process_id,
        };
        storage.upsert_span(&span).unwrap();
        let sink = RecordingSink::accepting();

        export_session(&storage, sink.as_ref(), &session)
            .await
            .unwrap();

        let submissions = sink.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].0, session.id.to_string());
        assert_eq!(submissions[0].1, UploadKind::Session);

        // the envelope holds the synthesized root span plus the stored span
        let value: serde_json::Value = serde_json::from_slice(&submissions[0].2).unwrap();
        assert_eq!(value["spans"].as_array().unwrap().len(), 2);

        assert!(storage.fetch_session(session.id).unwrap().is_none());
        assert!(storage.fetch_spans_for_session(session.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn export_session_keeps_records_when_sink_refuses() {
        let storage = BeaconStorage::in_memory().unwrap();
        let session = stored_session(&storage);
        let sink = RecordingSink::refusing();

        let result = export_session(&storage, sink.as_ref(), &session).await;

        assert!(result.is_err());
        assert!(storage.fetch_session(session.id).unwrap().is_some());
    }
}
