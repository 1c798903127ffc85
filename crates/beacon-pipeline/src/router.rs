//! Signal classification and routing.
//!
//! Producers call the `on_*` methods from any thread. Classification and
//! session stamping happen synchronously in the caller, before the signal
//! is enqueued, so a signal can never be attributed to a session that
//! ended before it was observed. The worker then persists the record and
//! only afterwards offers it to the batcher: write-then-batch, never the
//! reverse.

use crate::batcher::Batcher;
use crate::context::SessionContext;
use beacon_core::{
    attr, LogRecord, ProcessId, RawLog, RawSpan, SessionStateProvider, SignalScope, SpanRecord,
    SpanType,
};
use beacon_storage::BeaconStorage;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

enum Command {
    Span(SpanRecord),
    Log(LogRecord),
    /// Barrier: acked once every signal enqueued before it is durable.
    Flush { ack: oneshot::Sender<()> },
}

/// Ingestion boundary for spans and logs.
#[derive(Clone)]
pub struct SignalRouter {
    context: SessionContext,
    process_id: ProcessId,
    tx: mpsc::UnboundedSender<Command>,
}

impl SignalRouter {
    pub fn spawn(
        storage: BeaconStorage,
        context: SessionContext,
        process_id: ProcessId,
        span_batcher: Batcher<SpanRecord>,
        log_batcher: Batcher<LogRecord>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(rx, storage, span_batcher, log_batcher));

        Self {
            context,
            process_id,
            tx,
        }
    }

    /// A span began. Never fails the caller.
    pub fn on_span_started(&self, span: RawSpan) {
        let record = self.classify_span(span);
        self.send(Command::Span(record));
    }

    /// A span ended (or was reported already complete).
    pub fn on_span_ended(&self, span: RawSpan) {
        let record = self.classify_span(span);
        self.send(Command::Span(record));
    }

    /// A log was emitted.
    pub fn on_log_emitted(&self, log: RawLog) {
        let record = self.classify_log(log);
        self.send(Command::Log(record));
    }

    /// Wait until everything ingested so far reached the durable store.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Flush { ack }).is_ok() {
            let _ = done.await;
        }
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            warn!("router worker gone, dropping signal");
        }
    }

    /// Classify a raw span and stamp it. Internal signals pass through
    /// unchanged; external ones get the current session id and state.
    /// An unrecognizable shape is forwarded as external with no session.
    fn classify_span(&self, span: RawSpan) -> SpanRecord {
        let recognizable = !span.name.is_empty() && !span.span_id.is_empty();
        let scope = classify(&span.attributes);

        let mut record = SpanRecord {
            id: span.span_id,
            trace_id: span.trace_id,
            parent_span_id: span.parent_span_id,
            name: span.name,
            span_type: span.span_type,
            start_time: span.start_time,
            end_time: span.end_time,
            status: span.status,
            attributes: span.attributes,
            session_id: None,
            process_id: self.process_id,
        };

        if scope == SignalScope::External && recognizable {
            self.stamp(&mut record.attributes, &mut record.session_id);
        }
        record
    }

    fn classify_log(&self, log: RawLog) -> LogRecord {
        let recognizable = !log.body.is_empty();
        let scope = classify(&log.attributes);

        let mut record = LogRecord {
            id: Uuid::new_v4(),
            severity: log.severity,
            body: log.body,
            timestamp: log.timestamp,
            attributes: log.attributes,
            session_id: None,
            process_id: self.process_id,
        };

        if scope == SignalScope::External && recognizable {
            self.stamp(&mut record.attributes, &mut record.session_id);
        }
        record
    }

    fn stamp(
        &self,
        attributes: &mut std::collections::BTreeMap<String, String>,
        session_id: &mut Option<beacon_core::SessionId>,
    ) {
        // producers never set these; overwrite anything they tried
        attributes.remove(attr::SESSION_ID);
        attributes.remove(attr::SESSION_STATE);

        if let Some(id) = self.context.current_session_id() {
            *session_id = Some(id);
            attributes.insert(attr::SESSION_ID.into(), id.to_string());
        }
        if let Some(state) = self.context.current_state() {
            attributes.insert(attr::SESSION_STATE.into(), state.as_str().into());
        }
    }
}

fn classify(attributes: &std::collections::BTreeMap<String, String>) -> SignalScope {
    if attributes.get(attr::INTERNAL).map(String::as_str) == Some("true") {
        SignalScope::Internal
    } else {
        SignalScope::External
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    storage: BeaconStorage,
    span_batcher: Batcher<SpanRecord>,
    log_batcher: Batcher<LogRecord>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Span(record) => {
                // durability first; an unpersisted record must never batch
                if let Err(err) = storage.upsert_span(&record) {
                    warn!(span = %record.id, %err, "failed to persist span");
                    continue;
                }
                // only completed spans export mid-flight, and the session
                // root span is reserved for session finalization
                if record.end_time.is_some() && record.span_type != SpanType::Session {
                    span_batcher.add(record);
                }
            }
            Command::Log(record) => {
                if let Err(err) = storage.insert_log(&record) {
                    warn!(log = %record.id, %err, "failed to persist log");
                    continue;
                }
                log_batcher.add(record);
            }
            Command::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }
    debug!("signal router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActiveSession;
    use beacon_config::{BeaconConfig, ConfigHandle};
    use beacon_core::{SessionId, SessionState, Severity, SpanStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct Fixture {
        router: SignalRouter,
        context: SessionContext,
        storage: BeaconStorage,
        process_id: ProcessId,
        span_batches: mpsc::UnboundedReceiver<Vec<SpanRecord>>,
        log_batches: mpsc::UnboundedReceiver<Vec<LogRecord>>,
    }

    fn fixture() -> Fixture {
        let storage = BeaconStorage::in_memory().unwrap();
        let context = SessionContext::new();
        let process_id = ProcessId::random();

        let mut cfg = BeaconConfig::default();
        cfg.batch.max_records_per_batch = 1;
        let config = ConfigHandle::new(cfg);

        let (span_tx, span_batches) = mpsc::unbounded_channel();
        let (log_tx, log_batches) = mpsc::unbounded_channel();
        let span_batcher = Batcher::spawn("spans", config.clone(), span_tx);
        let log_batcher = Batcher::spawn("logs", config, log_tx);

        let router = SignalRouter::spawn(
            storage.clone(),
            context.clone(),
            process_id,
            span_batcher,
            log_batcher,
        );

        Fixture {
            router,
            context,
            storage,
            process_id,
            span_batches,
            log_batches,
        }
    }

    fn activate_session(context: &SessionContext) -> SessionId {
        let id = SessionId::random();
        context.swap(Some(ActiveSession {
            id,
            state: SessionState::Foreground,
            trace_id: "trace".into(),
            span_id: "root".into(),
            start_time: Utc::now(),
        }));
        id
    }

    fn raw_log(body: &str, attributes: BTreeMap<String, String>) -> RawLog {
        RawLog {
            severity: Severity::Info,
            body: body.into(),
            timestamp: Utc::now(),
            attributes,
        }
    }

    fn raw_span(name: &str, ended: bool) -> RawSpan {
        RawSpan {
            span_id: Uuid::new_v4().simple().to_string(),
            trace_id: Uuid::new_v4().simple().to_string(),
            parent_span_id: None,
            name: name.into(),
            span_type: beacon_core::SpanType::Performance,
            start_time: Utc::now(),
            end_time: ended.then(Utc::now),
            status: SpanStatus::Unset,
            attributes: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn external_log_is_stamped_with_session_and_state() {
        let mut fx = fixture();
        let session_id = activate_session(&fx.context);

        fx.router.on_log_emitted(raw_log("hello", BTreeMap::new()));
        fx.router.flush().await;

        let batch = fx.log_batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].session_id, Some(session_id));
        assert_eq!(
            batch[0].attributes.get(attr::SESSION_STATE).map(String::as_str),
            Some("foreground")
        );
    }

    #[tokio::test]
    async fn internal_signal_passes_through_unstamped() {
        let mut fx = fixture();
        activate_session(&fx.context);

        let attributes = BTreeMap::from([(attr::INTERNAL.to_string(), "true".to_string())]);
        fx.router.on_log_emitted(raw_log("diagnostic", attributes));
        fx.router.flush().await;

        let batch = fx.log_batches.recv().await.unwrap();
        assert_eq!(batch[0].session_id, None);
        assert!(!batch[0].attributes.contains_key(attr::SESSION_ID));
    }

    #[tokio::test]
    async fn producer_supplied_session_attributes_are_discarded() {
        let mut fx = fixture();
        // no active session at all

        let attributes =
            BTreeMap::from([(attr::SESSION_ID.to_string(), "spoofed".to_string())]);
        fx.router.on_log_emitted(raw_log("sneaky", attributes));
        fx.router.flush().await;

        let batch = fx.log_batches.recv().await.unwrap();
        assert_eq!(batch[0].session_id, None);
        assert!(!batch[0].attributes.contains_key(attr::SESSION_ID));
    }

    #[tokio::test]
    async fn unrecognizable_shape_forwards_as_external_without_session() {
        let mut fx = fixture();
        activate_session(&fx.context);

        fx.router.on_log_emitted(raw_log("", BTreeMap::new()));
        fx.router.flush().await;

        // not dropped, just unattributed
        let batch = fx.log_batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].session_id, None);
    }

    #[tokio::test]
    async fn record_is_durable_before_it_batches() {
        let mut fx = fixture();
        let session_id = activate_session(&fx.context);

        fx.router.on_log_emitted(raw_log("persist me", BTreeMap::new()));
        let batch = fx.log_batches.recv().await.unwrap();

        // by the time a batch exists, the store already has the record
        let stored = fx
            .storage
            .fetch_logs_excluding_process(ProcessId::random())
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, batch[0].id);
        assert_eq!(stored[0].session_id, Some(session_id));
        assert_eq!(stored[0].process_id, fx.process_id);
    }

    #[tokio::test]
    async fn started_spans_persist_but_do_not_batch() {
        let mut fx = fixture();
        let session_id = activate_session(&fx.context);

        fx.router.on_span_started(raw_span("loading", false));
        fx.router.flush().await;

        let stored = fx.storage.fetch_spans_for_session(session_id).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_open());
        assert!(fx.span_batches.try_recv().is_err());
    }

    #[tokio::test]
    async fn ended_spans_batch_for_export() {
        let mut fx = fixture();
        activate_session(&fx.context);

        fx.router.on_span_ended(raw_span("finished", true));

        let batch = fx.span_batches.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].name, "finished");
    }
}
