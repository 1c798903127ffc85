//! Coordinator behavior against a scriptable transport.

use async_trait::async_trait;
use beacon_config::{BeaconConfig, ConfigHandle};
use beacon_core::UploadKind;
use beacon_upload::{
    Dispatcher, UploadCache, UploadCoordinator, UploadError, UploadHandle, UploadRequest,
    UploadResult,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// Transport stub: scriptable success/failure, optional gate to hold
/// sends open, and concurrency accounting.
#[derive(Default)]
struct FakeDispatcher {
    succeed: AtomicBool,
    sent: Mutex<Vec<UploadRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeDispatcher {
    fn failing() -> Self {
        Self::default()
    }

    fn succeeding() -> Self {
        let dispatcher = Self::default();
        dispatcher.succeed.store(true, Ordering::SeqCst);
        dispatcher
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::succeeding()
        }
    }

    fn sends(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl Dispatcher for FakeDispatcher {
    async fn send(&self, request: UploadRequest) -> UploadResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        self.sent.lock().push(request);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.succeed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(UploadError::Status(503))
        }
    }
}

fn test_config(automatic_retry_count: u32, attempt_ceiling: u32) -> ConfigHandle {
    let mut config = BeaconConfig::default();
    config.upload.retry.automatic_retry_count = automatic_retry_count;
    config.upload.retry.attempt_ceiling = attempt_ceiling;
    config.upload.retry.base_backoff_ms = 1;
    config.upload.retry.max_backoff_ms = 2;
    ConfigHandle::new(config)
}

fn spawn_coordinator(
    dispatcher: Arc<FakeDispatcher>,
    config: ConfigHandle,
) -> (UploadHandle, UploadCache, watch::Sender<bool>) {
    let cache = UploadCache::in_memory().unwrap();
    let (connectivity_tx, connectivity_rx) = watch::channel(false);
    let handle = UploadCoordinator::spawn(
        cache.clone(),
        dispatcher,
        config,
        connectivity_rx,
    );
    (handle, cache, connectivity_tx)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn caller_is_acked_even_when_delivery_fails() {
    let dispatcher = Arc::new(FakeDispatcher::failing());
    let (handle, cache, _conn) = spawn_coordinator(dispatcher.clone(), test_config(0, 10));

    handle
        .upload("payload-1".into(), UploadKind::Logs, b"{}".to_vec())
        .await
        .expect("caller must be acked after the cache write");

    // the entry stays cached with its failure recorded
    wait_until(|| {
        cache
            .fetch("payload-1", UploadKind::Logs)
            .unwrap()
            .is_some_and(|e| e.attempt_count == 1)
    })
    .await;
}

#[tokio::test]
async fn confirmed_delivery_purges_the_cache_entry() {
    let dispatcher = Arc::new(FakeDispatcher::succeeding());
    let (handle, cache, _conn) = spawn_coordinator(dispatcher.clone(), test_config(0, 10));

    handle
        .upload("payload-1".into(), UploadKind::Session, b"{}".to_vec())
        .await
        .unwrap();

    wait_until(|| cache.fetch("payload-1", UploadKind::Session).unwrap().is_none()).await;
    assert_eq!(dispatcher.sends(), 1);
}

#[tokio::test]
async fn empty_id_and_empty_body_are_rejected() {
    let dispatcher = Arc::new(FakeDispatcher::succeeding());
    let (handle, _cache, _conn) = spawn_coordinator(dispatcher.clone(), test_config(0, 10));

    let err = handle
        .upload(String::new(), UploadKind::Logs, b"{}".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidMetadata(_)));

    let err = handle
        .upload("id".into(), UploadKind::Logs, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InvalidData(_)));

    assert_eq!(dispatcher.sends(), 0);
}

#[tokio::test]
async fn same_id_never_has_two_dispatches_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let dispatcher = Arc::new(FakeDispatcher::gated(gate.clone()));
    let (handle, cache, _conn) = spawn_coordinator(dispatcher.clone(), test_config(0, 10));

    // first upload blocks inside the transport; the second must not start
    // a second dispatch for the same id
    handle
        .upload("dup".into(), UploadKind::Logs, b"{}".to_vec())
        .await
        .unwrap();
    handle
        .upload("dup".into(), UploadKind::Logs, b"{}".to_vec())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.add_permits(8);

    wait_until(|| cache.fetch("dup", UploadKind::Logs).unwrap().is_none()).await;
    assert_eq!(dispatcher.sends(), 1);
    assert_eq!(dispatcher.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_cap_holds_until_connectivity_returns() {
    // 1 initial + 2 retries per cycle; ceiling of 3 total attempts
    let dispatcher = Arc::new(FakeDispatcher::failing());
    let (handle, cache, connectivity) = spawn_coordinator(dispatcher.clone(), test_config(2, 3));

    handle
        .upload("stubborn".into(), UploadKind::Spans, b"{}".to_vec())
        .await
        .unwrap();

    // the cycle exhausts, leaving the entry cached at the ceiling
    wait_until(|| {
        cache
            .fetch("stubborn", UploadKind::Spans)
            .unwrap()
            .is_some_and(|e| e.attempt_count == 3)
    })
    .await;
    assert_eq!(dispatcher.sends(), 3);

    // nothing else happens while the network stays down
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(dispatcher.sends(), 3);

    // connectivity regained: one more cycle, pushing past the ceiling,
    // after which the stale cleanup drops the entry
    connectivity.send(true).unwrap();
    wait_until(|| cache.fetch("stubborn", UploadKind::Spans).unwrap().is_none()).await;
    assert_eq!(dispatcher.sends(), 6);
}

#[tokio::test]
async fn launch_rescan_resends_leftovers() {
    let dispatcher = Arc::new(FakeDispatcher::succeeding());
    let cache = UploadCache::in_memory().unwrap();
    // a payload left behind by a previous run
    cache.save("leftover", UploadKind::Blob, b"{}").unwrap();

    let (_tx, connectivity_rx) = watch::channel(false);
    let handle = UploadCoordinator::spawn(
        cache.clone(),
        dispatcher.clone(),
        test_config(0, 10),
        connectivity_rx,
    );

    handle.retry_cached();

    wait_until(|| cache.fetch("leftover", UploadKind::Blob).unwrap().is_none()).await;
    assert_eq!(dispatcher.sends(), 1);
}
