//! Beacon: the telemetry event pipeline of a mobile observability SDK.
//!
//! Spans, logs and crash reports produced anywhere in a host application
//! are classified, persisted, batched and reliably delivered to a remote
//! collector despite process death, network loss and bursty producers —
//! without ever blocking the caller that records telemetry.
//!
//! ```no_run
//! use beacon_config::BeaconConfig;
//! use beacon_core::SessionState;
//! use beacon_sdk::Beacon;
//!
//! # async fn run() -> Result<(), beacon_sdk::SdkError> {
//! let beacon = Beacon::builder(BeaconConfig::default())
//!     .storage_dir("/var/lib/my-app/beacon")
//!     .start()
//!     .await?;
//!
//! beacon.start_session(SessionState::Foreground).await?;
//! // producers call beacon.ingest_log(..) / beacon.ingest_span(..)
//! beacon.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::{SdkError, SdkResult};

use async_trait::async_trait;
use beacon_config::{BeaconConfig, ConfigHandle};
use beacon_core::{
    CrashReport, CrashReporter, CrashReporterError, LogRecord, LogSource, MetadataRecord,
    PayloadSink, ProcessId, RawLog, RawSpan, SessionId, SessionState, SpanEvent, SpanRecord,
    SpanSource,
};
use beacon_pipeline::{
    Batcher, CrashCorrelator, RecoveryReport, SessionContext, SessionController, SignalExporter,
    SignalRouter,
};
use beacon_storage::{BeaconStorage, StorageOptions};
use beacon_upload::{Dispatcher, HttpDispatcher, UploadCache, UploadCoordinator, UploadHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Crash collector stub used when the host application wires none; the
/// recovery sweep still runs.
struct NoCrashReporter;

#[async_trait]
impl CrashReporter for NoCrashReporter {
    async fn fetch_unsent_reports(&self) -> Result<Vec<CrashReport>, CrashReporterError> {
        Ok(Vec::new())
    }

    async fn delete_report(&self, _id: &str) -> Result<(), CrashReporterError> {
        Ok(())
    }
}

/// Configures and starts a [`Beacon`] instance.
pub struct BeaconBuilder {
    config: BeaconConfig,
    storage_dir: Option<PathBuf>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    crash_reporter: Arc<dyn CrashReporter>,
    connectivity: Option<watch::Receiver<bool>>,
    span_sources: Vec<Arc<dyn SpanSource>>,
    log_sources: Vec<Arc<dyn LogSource>>,
}

impl BeaconBuilder {
    pub fn new(config: BeaconConfig) -> Self {
        Self {
            config,
            storage_dir: None,
            dispatcher: None,
            crash_reporter: Arc::new(NoCrashReporter),
            connectivity: None,
            span_sources: Vec::new(),
            log_sources: Vec::new(),
        }
    }

    /// Directory for the record store and upload cache databases. Without
    /// one, everything lives in memory (useful in tests only: nothing
    /// survives the process).
    pub fn storage_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_dir = Some(path.into());
        self
    }

    /// Replace the HTTP transport, e.g. with a test double.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Wire the crash-signal collector consulted at launch.
    pub fn crash_reporter(mut self, reporter: Arc<dyn CrashReporter>) -> Self {
        self.crash_reporter = reporter;
        self
    }

    /// Wire a reachability monitor; a flip to `true` re-sends cached
    /// payloads.
    pub fn connectivity(mut self, receiver: watch::Receiver<bool>) -> Self {
        self.connectivity = Some(receiver);
        self
    }

    /// Subscribe a span producer once the pipeline is running.
    pub fn span_source(mut self, source: Arc<dyn SpanSource>) -> Self {
        self.span_sources.push(source);
        self
    }

    /// Subscribe a log producer once the pipeline is running.
    pub fn log_source(mut self, source: Arc<dyn LogSource>) -> Self {
        self.log_sources.push(source);
        self
    }

    /// Start the pipeline. Recovery (crash correlation and the unsent-data
    /// sweep) completes before any producer is subscribed.
    pub async fn start(self) -> SdkResult<Beacon> {
        let config = ConfigHandle::new(self.config);
        let process_id = ProcessId::random();

        let (storage, cache) = match &self.storage_dir {
            Some(dir) => (
                BeaconStorage::open(StorageOptions::new(dir.join("telemetry.db")))?,
                UploadCache::open(StorageOptions::new(dir.join("upload-cache.db")))?,
            ),
            None => (BeaconStorage::in_memory()?, UploadCache::in_memory()?),
        };

        // keep a sender alive when no reachability monitor is wired
        let (held_connectivity, connectivity) = match self.connectivity {
            Some(receiver) => (None, receiver),
            None => {
                let (tx, rx) = watch::channel(false);
                (Some(tx), rx)
            }
        };

        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(HttpDispatcher::new()));
        let upload = UploadCoordinator::spawn(cache, dispatcher, config.clone(), connectivity);
        let sink: Arc<dyn PayloadSink> = Arc::new(upload.clone());

        // unconditional launch re-scan of the upload cache
        upload.retry_cached();

        // recovery precedes ingestion
        let recovery = CrashCorrelator::new(
            storage.clone(),
            sink.clone(),
            self.crash_reporter,
            config.clone(),
            process_id,
        )
        .recover_and_queue()
        .await?;

        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (span_tx, span_rx) = mpsc::unbounded_channel();
        let log_batcher: Batcher<LogRecord> = Batcher::spawn("logs", config.clone(), log_tx);
        let span_batcher: Batcher<SpanRecord> = Batcher::spawn("spans", config.clone(), span_tx);
        SignalExporter::spawn(storage.clone(), sink.clone(), log_rx, span_rx);

        let context = SessionContext::new();
        let sessions = SessionController::new(
            storage.clone(),
            context.clone(),
            sink,
            config.clone(),
            process_id,
        );
        let router = SignalRouter::spawn(
            storage.clone(),
            context,
            process_id,
            span_batcher.clone(),
            log_batcher.clone(),
        );

        for source in &self.span_sources {
            let router = router.clone();
            source.subscribe(Arc::new(move |event| match event {
                SpanEvent::Started(span) => router.on_span_started(span),
                SpanEvent::Ended(span) => router.on_span_ended(span),
            }));
        }
        for source in &self.log_sources {
            let router = router.clone();
            source.subscribe(Arc::new(move |log| router.on_log_emitted(log)));
        }

        info!(%process_id, "beacon pipeline started");
        Ok(Beacon {
            config,
            storage,
            router,
            sessions,
            upload,
            log_batcher,
            span_batcher,
            recovery,
            process_id,
            _held_connectivity: held_connectivity,
        })
    }
}

/// A running telemetry pipeline.
pub struct Beacon {
    config: ConfigHandle,
    storage: BeaconStorage,
    router: SignalRouter,
    sessions: SessionController,
    upload: UploadHandle,
    log_batcher: Batcher<LogRecord>,
    span_batcher: Batcher<SpanRecord>,
    recovery: RecoveryReport,
    process_id: ProcessId,
    _held_connectivity: Option<watch::Sender<bool>>,
}

impl Beacon {
    pub fn builder(config: BeaconConfig) -> BeaconBuilder {
        BeaconBuilder::new(config)
    }

    /// Record a span. A span carrying an end time is treated as ended;
    /// otherwise as started. Never blocks and never fails the caller.
    pub fn ingest_span(&self, span: RawSpan) {
        if span.end_time.is_some() {
            self.router.on_span_ended(span);
        } else {
            self.router.on_span_started(span);
        }
    }

    /// Record a log. Never blocks and never fails the caller.
    pub fn ingest_log(&self, log: RawLog) {
        self.router.on_log_emitted(log);
    }

    /// Begin a session, ending any active one first.
    pub async fn start_session(&self, state: SessionState) -> SdkResult<SessionId> {
        Ok(self.sessions.start_session(state).await?)
    }

    /// End the active session cleanly and queue its payload.
    pub async fn end_session(&self) -> SdkResult<Option<SessionId>> {
        Ok(self.sessions.end_session().await?)
    }

    /// Foreground/background transition.
    pub fn transition_state(&self, state: SessionState) {
        self.sessions.transition_state(state);
    }

    /// Attach a resource, custom property or persona tag. Scoped and
    /// garbage-collected by its lifespan.
    pub fn record_metadata(&self, record: &MetadataRecord) -> SdkResult<()> {
        Ok(self.storage.upsert_metadata(record)?)
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        use beacon_core::SessionStateProvider;
        self.sessions.context().current_session_id()
    }

    /// Force everything through: drain ingestion to the store, close both
    /// open batches, and nudge the upload layer to re-send its cache.
    pub async fn flush_now(&self) {
        self.router.flush().await;
        self.log_batcher.force_close().await;
        self.span_batcher.force_close().await;
        self.upload.retry_cached();
    }

    /// Clean shutdown: end the session, flush, and stop taking payloads.
    /// Dispatches already in flight run to completion.
    pub async fn shutdown(self) -> SdkResult<()> {
        let ended = self.sessions.end_session().await?;
        self.flush_now().await;
        self.upload.shutdown().await;
        info!(session = ?ended, "beacon pipeline stopped");
        Ok(())
    }

    /// What the launch-time recovery pass accomplished.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// This launch's process id.
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// Live configuration handle; replacing limits takes effect on the
    /// next batch/upload cycle.
    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Read-only access to the durable store.
    pub fn storage(&self) -> &BeaconStorage {
        &self.storage
    }
}
