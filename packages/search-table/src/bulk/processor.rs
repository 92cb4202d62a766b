//! Bulk Processor
//!
//! Buffers pending operations and dispatches them as bulk requests.
//!
//! # Flow
//!
//! ```text
//! enqueue ──► current batch ──(count / size / age)──► dispatcher task
//!                                                        │ acquire permit
//!                                                        ▼
//!                                               send task (retry loop)
//! ```
//!
//! Batches reach the dispatcher in swap order, and permits are taken in that
//! order, so with a single permit batches are sent strictly one after another.
//! `enqueue` never waits on the network.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backoff::BackoffPolicy;
use super::listener::BulkListener;
use super::metrics::BulkMetrics;
use crate::config::TableConfig;
use crate::domain::models::PendingOperation;
use crate::domain::ports::SearchBackend;
use crate::error::{Result, TableError};

/// Dispatch thresholds and retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSettings {
    /// Operation count trigger
    pub bulk_actions: Option<usize>,
    /// Estimated payload bytes trigger
    pub bulk_size: Option<usize>,
    /// Max age of a non-empty batch
    pub flush_interval: Option<Duration>,
    /// Dispatches allowed in flight, at least 1
    pub max_in_flight: usize,
    pub backoff: BackoffPolicy,
}

impl BulkSettings {
    pub fn from_config(config: &TableConfig) -> Self {
        Self {
            bulk_actions: config.bulk_actions_threshold(),
            bulk_size: config.bulk_size_bytes(),
            flush_interval: config.flush_interval(),
            max_in_flight: config.max_in_flight(),
            backoff: BackoffPolicy::from_config(config),
        }
    }
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self::from_config(&TableConfig::default())
    }
}

/// Batch handed to the dispatcher
#[derive(Debug)]
struct Batch {
    execution_id: u64,
    operations: Vec<PendingOperation>,
}

enum Command {
    Dispatch(Batch),
    /// Reply once every batch sent before this command has completed
    Barrier(oneshot::Sender<()>),
}

struct BatchState {
    operations: Vec<PendingOperation>,
    bytes: usize,
    /// When the batch became non-empty
    opened_at: Option<Instant>,
    /// `None` once closed
    sender: Option<mpsc::UnboundedSender<Command>>,
}

struct Shared {
    table_id: String,
    backend: Arc<dyn SearchBackend>,
    listener: Arc<dyn BulkListener>,
    metrics: BulkMetrics,
    settings: BulkSettings,
    state: Mutex<BatchState>,
    permits: Arc<Semaphore>,
    next_execution_id: AtomicU64,
    batch_opened: Notify,
}

/// Buffering bulk dispatcher
pub struct BulkProcessor {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BulkProcessor {
    /// Start the dispatcher (and flusher, when an interval is set) on the
    /// current tokio runtime
    pub fn start(
        table_id: impl Into<String>,
        backend: Arc<dyn SearchBackend>,
        listener: Arc<dyn BulkListener>,
        metrics: BulkMetrics,
        settings: BulkSettings,
    ) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            TableError::config("Bulk processor must be started inside a tokio runtime")
                .with_source(e)
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let max_in_flight = settings.max_in_flight.max(1);
        let shared = Arc::new(Shared {
            table_id: table_id.into(),
            backend,
            listener,
            metrics,
            settings: BulkSettings {
                max_in_flight,
                ..settings
            },
            state: Mutex::new(BatchState {
                operations: Vec::new(),
                bytes: 0,
                opened_at: None,
                sender: Some(tx),
            }),
            permits: Arc::new(Semaphore::new(max_in_flight)),
            next_execution_id: AtomicU64::new(1),
            batch_opened: Notify::new(),
        });

        let mut tasks = vec![runtime.spawn(run_dispatcher(shared.clone(), rx))];
        if let Some(interval) = shared.settings.flush_interval {
            tasks.push(runtime.spawn(run_flusher(shared.clone(), interval)));
        }

        debug!(
            "Bulk processor started (table={}, actions={:?}, size={:?}, interval={:?}, in_flight={})",
            shared.table_id,
            shared.settings.bulk_actions,
            shared.settings.bulk_size,
            shared.settings.flush_interval,
            max_in_flight
        );

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn settings(&self) -> &BulkSettings {
        &self.shared.settings
    }

    /// Operations buffered in the current (not yet swapped) batch
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().operations.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().sender.is_none()
    }

    /// Add an operation to the current batch
    ///
    /// Swaps the batch out for dispatch when a count or size threshold is
    /// reached. Never waits on a dispatch.
    pub fn enqueue(&self, operation: PendingOperation) -> Result<()> {
        let size = operation.estimated_size();
        let mut state = self.shared.state.lock();
        if state.sender.is_none() {
            return Err(TableError::closed(&self.shared.table_id));
        }

        let was_empty = state.operations.is_empty();
        state.operations.push(operation);
        state.bytes += size;
        self.shared.metrics.enqueued.inc();
        self.shared.metrics.pending.inc();

        let settings = &self.shared.settings;
        let count_reached = settings
            .bulk_actions
            .is_some_and(|limit| state.operations.len() >= limit);
        let size_reached = settings.bulk_size.is_some_and(|limit| state.bytes >= limit);

        if count_reached || size_reached {
            self.shared.swap_and_send(&mut state);
        } else if was_empty {
            state.opened_at = Some(Instant::now());
            self.shared.batch_opened.notify_one();
        }
        Ok(())
    }

    /// Dispatch the current batch and wait until every batch swapped out so
    /// far has completed (successfully or fatally)
    pub async fn flush(&self) -> Result<()> {
        let receiver = {
            let mut state = self.shared.state.lock();
            self.shared.swap_and_send(&mut state);
            let sender = state
                .sender
                .as_ref()
                .ok_or_else(|| TableError::closed(&self.shared.table_id))?;
            let (tx, rx) = oneshot::channel();
            sender
                .send(Command::Barrier(tx))
                .map_err(|_| TableError::closed(&self.shared.table_id))?;
            rx
        };
        receiver
            .await
            .map_err(|_| TableError::closed(&self.shared.table_id))
    }

    /// Flush, stop accepting operations and wait for background tasks
    ///
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let flushed = self.flush().await;

        {
            let mut state = self.shared.state.lock();
            // Anything enqueued while flushing still goes out before the
            // dispatcher sees the closed channel.
            self.shared.swap_and_send(&mut state);
            state.sender = None;
        }
        self.shared.batch_opened.notify_one();

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Bulk processor task ended abnormally (table={}): {}", self.shared.table_id, e);
            }
        }
        debug!("Bulk processor closed (table={})", self.shared.table_id);
        flushed
    }
}

impl Drop for BulkProcessor {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        self.shared.swap_and_send(&mut state);
        state.sender = None;
        drop(state);
        self.shared.batch_opened.notify_one();
    }
}

impl Shared {
    /// Swap the current batch out and hand it to the dispatcher
    ///
    /// Runs under the state lock so batches reach the dispatcher in swap order.
    fn swap_and_send(&self, state: &mut BatchState) {
        if state.operations.is_empty() {
            return;
        }
        let Some(sender) = state.sender.as_ref() else {
            return;
        };
        let operations = std::mem::take(&mut state.operations);
        state.bytes = 0;
        state.opened_at = None;

        let batch = Batch {
            execution_id: self.next_execution_id.fetch_add(1, Ordering::Relaxed),
            operations,
        };
        if let Err(mpsc::error::SendError(Command::Dispatch(batch))) =
            sender.send(Command::Dispatch(batch))
        {
            self.metrics.pending.sub(batch.operations.len() as i64);
            warn!(
                "Dropped bulk [{}] with {} requests: dispatcher stopped (table={})",
                batch.execution_id,
                batch.operations.len(),
                self.table_id
            );
        }
    }

    /// Send one batch, retrying whole-request failures per the backoff policy
    async fn execute(&self, batch: Batch) {
        let operations = batch.operations.len();
        self.listener.before_dispatch(batch.execution_id, operations);
        self.metrics.in_flight.inc();
        let timer = self.metrics.dispatch_duration.start_timer();

        let mut attempt = 0;
        let outcome = loop {
            self.metrics.dispatches.inc();
            match self.backend.bulk(&batch.operations).await {
                Ok(response) => break Ok(response),
                Err(e) if e.is_retryable() => match self.settings.backoff.next_delay(attempt) {
                    Some(delay) => {
                        attempt += 1;
                        self.metrics.retries.inc();
                        warn!(
                            "Bulk [{}] failed, retry {} in {:?} (table={}): {}",
                            batch.execution_id, attempt, delay, self.table_id, e
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => break Err(e),
                },
                Err(e) => break Err(e),
            }
        };

        timer.observe_duration();
        self.metrics.in_flight.dec();
        self.metrics.pending.sub(operations as i64);

        match outcome {
            Ok(response) => {
                self.metrics.operations.inc_by(operations as u64);
                self.metrics
                    .failed_operations
                    .inc_by(response.items.iter().filter(|i| i.is_failure()).count() as u64);
                self.listener
                    .after_dispatch(batch.execution_id, operations, &response);
            }
            Err(e) => {
                self.metrics.fatal_dispatches.inc();
                self.listener
                    .after_dispatch_fatal(batch.execution_id, operations, &e);
            }
        }
    }
}

/// Receives batches in swap order and runs each under a permit
async fn run_dispatcher(shared: Arc<Shared>, mut commands: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Dispatch(batch) => {
                let permit = match shared.permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let worker = shared.clone();
                tokio::spawn(async move {
                    worker.execute(batch).await;
                    drop(permit);
                });
            }
            Command::Barrier(done) => {
                let all = shared.settings.max_in_flight as u32;
                if let Ok(permits) = shared.permits.acquire_many(all).await {
                    drop(permits);
                }
                let _ = done.send(());
            }
        }
    }

    // Wait for the last in-flight sends.
    let all = shared.settings.max_in_flight as u32;
    if let Ok(permits) = shared.permits.acquire_many(all).await {
        drop(permits);
    }
}

/// Dispatches a batch once it has been open for `interval`
async fn run_flusher(shared: Arc<Shared>, interval: Duration) {
    loop {
        let opened_at = {
            let state = shared.state.lock();
            if state.sender.is_none() {
                return;
            }
            state.opened_at
        };

        match opened_at {
            None => shared.batch_opened.notified().await,
            Some(opened_at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(opened_at + interval) => {}
                    // Batch swapped and reopened, or processor closed.
                    _ = shared.batch_opened.notified() => continue,
                }
                let mut state = shared.state.lock();
                // The batch may have been swapped (and a new one opened) meanwhile.
                if state.opened_at == Some(opened_at) {
                    debug!("Flush interval elapsed (table={})", shared.table_id);
                    shared.swap_and_send(&mut state);
                }
            }
        }
    }
}
