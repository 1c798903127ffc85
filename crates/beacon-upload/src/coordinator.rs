//! The upload coordinator worker.
//!
//! One serial worker owns the cache; every `upload` call runs two
//! dependent sub-steps: a cache write that acknowledges the caller, then a
//! network dispatch on a spawned task so the worker itself never waits on
//! I/O. An id-scoped in-flight set ensures at most one dispatch per
//! payload at a time.

use crate::cache::{CachedUpload, UploadCache};
use crate::client::{Dispatcher, UploadRequest};
use crate::error::{UploadError, UploadResult};
use async_trait::async_trait;
use beacon_config::{ConfigHandle, Endpoints, UploadSettings};
use beacon_core::{PayloadSink, SinkError, UploadKind};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

enum Command {
    Upload {
        id: String,
        kind: UploadKind,
        bytes: Vec<u8>,
        ack: oneshot::Sender<UploadResult<()>>,
    },
    RetryCached,
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Cheaply cloneable handle to the coordinator worker.
#[derive(Clone)]
pub struct UploadHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl UploadHandle {
    /// Hand a payload over for delivery. Resolves once the payload is
    /// cached — safe to forget locally — not once it reached the network.
    pub async fn upload(&self, id: String, kind: UploadKind, bytes: Vec<u8>) -> UploadResult<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Upload { id, kind, bytes, ack })
            .map_err(|_| UploadError::Closed)?;
        done.await.map_err(|_| UploadError::Closed)?
    }

    /// Re-scan the cache and re-send everything not already in flight.
    /// Fired at launch and on demand.
    pub fn retry_cached(&self) {
        let _ = self.tx.send(Command::RetryCached);
    }

    /// Stop accepting new payloads. Dispatches already in flight run to
    /// completion on their own tasks.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown { ack }).is_ok() {
            let _ = done.await;
        }
    }
}

#[async_trait]
impl PayloadSink for UploadHandle {
    async fn submit(&self, id: String, kind: UploadKind, bytes: Vec<u8>) -> Result<(), SinkError> {
        self.upload(id, kind, bytes).await.map_err(|err| match err {
            UploadError::InvalidMetadata(msg) | UploadError::InvalidData(msg) => {
                SinkError::Rejected(msg)
            }
            UploadError::Closed => SinkError::Closed,
            other => SinkError::Failure(other.to_string()),
        })
    }
}

/// Spawns and owns the upload worker.
pub struct UploadCoordinator {
    cache: UploadCache,
    dispatcher: Arc<dyn Dispatcher>,
    config: ConfigHandle,
    in_flight: Arc<Mutex<HashSet<(String, UploadKind)>>>,
}

impl UploadCoordinator {
    /// Start the worker. `connectivity` reports reachability transitions;
    /// a flip to `true` triggers a full cache re-scan.
    pub fn spawn(
        cache: UploadCache,
        dispatcher: Arc<dyn Dispatcher>,
        config: ConfigHandle,
        connectivity: watch::Receiver<bool>,
    ) -> UploadHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            cache,
            dispatcher,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        };

        tokio::spawn(coordinator.run(rx, connectivity));

        UploadHandle { tx }
    }

    async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<Command>,
        mut connectivity: watch::Receiver<bool>,
    ) {
        let mut connectivity_open = true;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Upload { id, kind, bytes, ack }) => {
                        self.handle_upload(id, kind, bytes, ack);
                    }
                    Some(Command::RetryCached) => self.resend_cached(),
                    Some(Command::Shutdown { ack }) => {
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
                changed = connectivity.changed(), if connectivity_open => {
                    match changed {
                        Ok(()) => {
                            if *connectivity.borrow_and_update() {
                                info!("connectivity regained, re-sending cached payloads");
                                self.resend_cached();
                            }
                        }
                        Err(_) => connectivity_open = false,
                    }
                }
            }
        }

        debug!("upload coordinator stopped");
    }

    /// Sub-step (a): cache-write, then acknowledge; sub-step (b): network
    /// dispatch on its own task.
    fn handle_upload(
        &self,
        id: String,
        kind: UploadKind,
        bytes: Vec<u8>,
        ack: oneshot::Sender<UploadResult<()>>,
    ) {
        if id.is_empty() {
            let _ = ack.send(Err(UploadError::InvalidMetadata("empty payload id".into())));
            return;
        }
        if bytes.is_empty() {
            let _ = ack.send(Err(UploadError::InvalidData("empty payload body".into())));
            return;
        }

        if let Err(err) = self.cache.save(&id, kind, &bytes) {
            let _ = ack.send(Err(err));
            return;
        }
        let _ = ack.send(Ok(()));

        // re-read so a re-submit of an already cached id keeps its attempt
        // count and original bytes
        match self.cache.fetch(&id, kind) {
            Ok(Some(entry)) => self.dispatch(entry),
            Ok(None) => warn!(%id, "cached payload vanished before dispatch"),
            Err(err) => warn!(%id, %err, "failed to read back cached payload"),
        }
    }

    fn resend_cached(&self) {
        let entries = match self.cache.fetch_all() {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "failed to scan upload cache");
                return;
            }
        };

        debug!(count = entries.len(), "re-sending cached payloads");
        for entry in entries {
            self.dispatch(entry);
        }
    }

    fn dispatch(&self, entry: CachedUpload) {
        let key = (entry.id.clone(), entry.kind);
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(key.clone()) {
                debug!(id = %entry.id, "payload already in flight, skipping");
                return;
            }
        }

        let cache = self.cache.clone();
        let dispatcher = self.dispatcher.clone();
        let settings = self.config.upload_settings();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            deliver(entry, cache, dispatcher, settings).await;
            in_flight.lock().remove(&key);
        });
    }
}

/// One delivery cycle: the initial attempt plus the configured immediate
/// retries, exponential backoff in between. On success the cache entry is
/// deleted; otherwise the accumulated attempt count is written back and
/// the entry waits for connectivity or the next launch.
async fn deliver(
    entry: CachedUpload,
    cache: UploadCache,
    dispatcher: Arc<dyn Dispatcher>,
    settings: UploadSettings,
) {
    let retry = &settings.retry;
    let endpoint = endpoint_for(&settings.endpoints, entry.kind);
    let tries = retry.automatic_retry_count.saturating_add(1);

    let mut attempts = entry.attempt_count;
    let mut delivered = false;

    for try_index in 0..tries {
        attempts += 1;

        let request = UploadRequest {
            endpoint: endpoint.clone(),
            body: entry.data.clone(),
            attempt_count: attempts,
            timeout: retry.request_timeout(),
            api_key: settings.api_key.clone(),
            device_id: settings.device_id.clone(),
        };

        match dispatcher.send(request).await {
            Ok(()) => {
                delivered = true;
                break;
            }
            Err(err) => {
                warn!(
                    id = %entry.id,
                    kind = entry.kind.as_str(),
                    attempts,
                    %err,
                    "payload delivery failed"
                );
                if try_index + 1 < tries {
                    tokio::time::sleep(retry.backoff_for(try_index)).await;
                }
            }
        }
    }

    let bookkeeping = if delivered {
        debug!(id = %entry.id, kind = entry.kind.as_str(), "payload delivered");
        cache.delete(&entry.id, entry.kind)
    } else {
        cache.update_attempt_count(&entry.id, entry.kind, attempts)
    };
    if let Err(err) = bookkeeping {
        warn!(id = %entry.id, %err, "failed to update upload cache");
    }

    // bounded local growth: stale cleanup runs after every attempt cycle
    if let Err(err) = cache.clear_stale(
        retry.attempt_ceiling,
        settings.cache.max_payload_age(),
        Utc::now(),
    ) {
        warn!(%err, "stale cache cleanup failed");
    }
}

fn endpoint_for(endpoints: &Endpoints, kind: UploadKind) -> String {
    match kind {
        UploadKind::Session => endpoints.sessions_url(),
        UploadKind::Spans => endpoints.spans_url(),
        UploadKind::Logs => endpoints.logs_url(),
        UploadKind::Blob => endpoints.blobs_url(),
    }
}
