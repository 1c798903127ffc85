//! Time/size-bounded batching.
//!
//! One serial worker per signal kind owns the open batch; spans and logs
//! batch independently and never block each other. A deadline timer is
//! armed when a batch becomes non-empty and cancelled on rotation, so a
//! quiet period still closes a partial batch without any polling.

use beacon_config::{BatchLimits, ConfigHandle};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Closed,
}

/// An open or closed group of records awaiting export.
pub struct Batch<T> {
    records: Vec<T>,
    opened_at: Instant,
    state: BatchState,
    limits: BatchLimits,
}

impl<T> Batch<T> {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            records: Vec::with_capacity(limits.max_records_per_batch),
            opened_at: Instant::now(),
            state: BatchState::Open,
            limits,
        }
    }

    /// Insert a record, closing the batch if it reaches the size limit.
    ///
    /// Fails fast when the batch is already closed or aged out, handing the
    /// record back; the caller starts a fresh batch seeded with it. Keeping
    /// rejection separate from rotation avoids re-entrant batch handling.
    pub fn add(&mut self, record: T) -> Result<BatchState, T> {
        if self.state == BatchState::Closed || self.is_aged() {
            return Err(record);
        }

        self.records.push(record);
        if self.records.len() >= self.limits.max_records_per_batch {
            self.state = BatchState::Closed;
        }
        Ok(self.state)
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn is_aged(&self) -> bool {
        !self.records.is_empty() && self.opened_at.elapsed() >= self.limits.max_batch_age()
    }

    fn into_records(self) -> Vec<T> {
        self.records
    }
}

enum Command<T> {
    Add(T),
    ForceClose { ack: Option<oneshot::Sender<()>> },
}

/// Handle to one signal kind's batching worker.
#[derive(Clone)]
pub struct Batcher<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
}

impl<T: Send + 'static> Batcher<T> {
    /// Start a batching worker. Closed batches are handed off through
    /// `closed_tx` in arrival order.
    pub fn spawn(
        kind: &'static str,
        config: ConfigHandle,
        closed_tx: mpsc::UnboundedSender<Vec<T>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            kind,
            config,
            closed_tx,
            batch: None,
            deadline: None,
        };
        tokio::spawn(worker.run(rx));

        Self { tx }
    }

    /// Enqueue a record. Never blocks and never fails the caller; if the
    /// worker is gone the record is dropped with a diagnostic.
    pub fn add(&self, record: T) {
        if self.tx.send(Command::Add(record)).is_err() {
            warn!("batcher worker gone, dropping record");
        }
    }

    /// Close the current batch regardless of size or age, waiting until
    /// the hand-off happened.
    pub async fn force_close(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::ForceClose { ack: Some(ack) }).is_ok() {
            let _ = done.await;
        }
    }
}

struct Worker<T> {
    kind: &'static str,
    config: ConfigHandle,
    closed_tx: mpsc::UnboundedSender<Vec<T>>,
    batch: Option<Batch<T>>,
    deadline: Option<Instant>,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command<T>>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Add(record)) => self.handle_add(record),
                    Some(Command::ForceClose { ack }) => {
                        self.rotate(Vec::new());
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                    }
                    None => {
                        // producers gone; flush what is left
                        self.rotate(Vec::new());
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                        if deadline.is_some() => {
                    debug!(kind = self.kind, "batch deadline reached");
                    self.rotate(Vec::new());
                }
            }
        }
    }

    fn handle_add(&mut self, record: T) {
        match self.batch.as_mut() {
            Some(batch) => match batch.add(record) {
                Ok(BatchState::Closed) => self.rotate(Vec::new()),
                Ok(BatchState::Open) => {}
                // full or aged: rotate with the rejected record as the
                // first member of the fresh batch
                Err(record) => self.rotate(vec![record]),
            },
            None => self.open_batch(vec![record]),
        }
    }

    /// Hand off the current batch (if non-empty) and start over, seeding
    /// the fresh batch with any rejected records.
    fn rotate(&mut self, seed: Vec<T>) {
        self.deadline = None;

        if let Some(batch) = self.batch.take() {
            let records = batch.into_records();
            if !records.is_empty() {
                debug!(kind = self.kind, records = records.len(), "batch closed");
                if self.closed_tx.send(records).is_err() {
                    warn!(kind = self.kind, "exporter gone, dropping closed batch");
                }
            }
        }

        if !seed.is_empty() {
            self.open_batch(seed);
        }
    }

    fn open_batch(&mut self, seed: Vec<T>) {
        let limits = self.config.batch_limits();
        let mut batch = Batch::new(limits.clone());

        for record in seed {
            // a seed can only close the batch, never be rejected by it
            if batch.add(record).is_ok_and(|state| state == BatchState::Closed) {
                let records = std::mem::replace(&mut batch, Batch::new(limits.clone())).into_records();
                debug!(kind = self.kind, records = records.len(), "batch closed");
                if self.closed_tx.send(records).is_err() {
                    warn!(kind = self.kind, "exporter gone, dropping closed batch");
                }
            }
        }

        if batch.is_empty() {
            self.batch = None;
        } else {
            self.deadline = Some(Instant::now() + limits.max_batch_age());
            self.batch = Some(batch);
        }
    }
}
