//! The Beacon telemetry pipeline.
//!
//! Signals enter through the [`SignalRouter`], which classifies and stamps
//! them before anything else sees them; records are persisted to the
//! durable store strictly before they become eligible for batching; closed
//! batches flow to the exporter, which hands encoded payloads to the
//! upload layer and deletes delivered records. The [`CrashCorrelator`]
//! runs once at launch, before ingestion resumes, reconciling crash
//! reports with stored sessions and sweeping up everything a dead process
//! left behind.
//!
//! Each component owns one serial worker; cross-component calls are
//! enqueue-and-return, so a slow network call can never block a producer.

mod batcher;
mod context;
mod error;
mod exporter;
mod payload;
mod recovery;
mod router;
mod session;

pub use batcher::{Batch, BatchState, Batcher};
pub use context::{ActiveSession, SessionContext};
pub use error::{PipelineError, PipelineResult};
pub use exporter::{export_session, SignalExporter};
pub use payload::{
    encode, session_root_span, CrashPayload, LogsPayload, SessionPayload, SpansPayload,
};
pub use recovery::{CrashCorrelator, RecoveryReport};
pub use router::SignalRouter;
pub use session::SessionController;
