//! Records written before a process dies must be readable on relaunch.

use beacon_core::{
    LogRecord, ProcessId, SessionId, SessionRecord, SessionState, Severity, SpanRecord,
    SpanStatus, SpanType,
};
use beacon_storage::BeaconStorage;
use chrono::Utc;
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("telemetry.db");

    let session_id = SessionId::random();
    let process_id = ProcessId::random();
    let now = Utc::now();

    let span = SpanRecord {
        id: "00f067aa0ba902b7".into(),
        trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".into(),
        parent_span_id: None,
        name: "checkout".into(),
        span_type: SpanType::Performance,
        start_time: now,
        end_time: None,
        status: SpanStatus::Unset,
        attributes: BTreeMap::from([("cart.items".to_string(), "3".to_string())]),
        session_id: Some(session_id),
        process_id,
    };

    let log = LogRecord {
        id: uuid::Uuid::new_v4(),
        severity: Severity::Error,
        body: "payment declined".into(),
        timestamp: now,
        attributes: BTreeMap::new(),
        session_id: Some(session_id),
        process_id,
    };

    let session = SessionRecord {
        id: session_id,
        process_id,
        state: SessionState::Foreground,
        trace_id: span.trace_id.clone(),
        span_id: "53995c3f42cd8ad8".into(),
        start_time: now,
        last_heartbeat_time: now,
        end_time: None,
        crash_report_id: None,
        cold_start: true,
        clean_exit: false,
    };

    // First "process": write and drop the handle without any clean shutdown.
    {
        let storage = BeaconStorage::open_at(&db_path).unwrap();
        storage.upsert_session(&session).unwrap();
        storage.upsert_span(&span).unwrap();
        storage.insert_log(&log).unwrap();
    }

    // Second "process": everything is still there.
    let storage = BeaconStorage::open_at(&db_path).unwrap();

    let fetched_session = storage.fetch_session(session_id).unwrap().unwrap();
    assert_eq!(fetched_session.process_id, process_id);
    assert!(fetched_session.cold_start);

    let spans = storage.fetch_spans_for_session(session_id).unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "checkout");
    assert!(spans[0].is_open());

    let logs = storage
        .fetch_logs_excluding_process(ProcessId::random())
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].body, "payment declined");
}
