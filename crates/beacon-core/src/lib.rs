//! Core types shared across the Beacon telemetry pipeline.
//!
//! This crate holds the record types persisted by `beacon-storage`, the
//! signal enums stamped by the classifier, and the narrow traits the
//! pipeline uses to talk to its collaborators (crash reporter, payload
//! sink, event sources). It deliberately has no runtime dependencies
//! beyond serialization so every other crate can depend on it.

pub mod crash;
pub mod ids;
pub mod records;
pub mod signal;
pub mod traits;

pub use crash::{CrashReport, CrashReporter, CrashReporterError};
pub use ids::{IdParseError, ProcessId, SessionId};
pub use records::{
    LogRecord, MetadataKind, MetadataLifespan, MetadataRecord, SessionRecord, SpanRecord,
};
pub use signal::{
    attr, EnumParseError, RawLog, RawSpan, SessionState, Severity, SignalScope, SpanStatus,
    SpanType,
};
pub use traits::{
    LogHandler, LogSource, PayloadSink, SessionStateProvider, SinkError, SpanEvent, SpanHandler,
    SpanSource, UploadKind,
};
