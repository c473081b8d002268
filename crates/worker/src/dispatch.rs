//! Run dispatch: a bounded queue feeding one execution loop.
//!
//! Producers (the intake poller and the admission scheduler) push run
//! ids without waiting; a single consumer loop drains them through the
//! orchestrator. The in-flight set deduplicates: a run already accepted
//! is never queued twice, no matter how many tickers notice it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use statrig_core::types::DbId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{ExecuteOutcome, Orchestrator};
use crate::scheduler::AdmissionScheduler;

/// Bound on runs accepted but not yet executed.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Run ids accepted for execution and not yet finished. Shared between
/// the dispatch handle (claims on enqueue) and the execution loop
/// (releases after the attempt), and read by the admission scheduler as
/// the local half of its concurrency check.
#[derive(Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<HashSet<DbId>>>,
}

impl InFlight {
    /// Claim a run id. False when the id is already claimed.
    fn try_claim(&self, run_id: DbId) -> bool {
        self.inner.lock().unwrap().insert(run_id)
    }

    fn release(&self, run_id: DbId) {
        self.inner.lock().unwrap().remove(&run_id);
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Producer side of the dispatch queue. Cheap to clone.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<DbId>,
    inflight: InFlight,
}

impl DispatchHandle {
    /// Queue a run for execution without blocking.
    ///
    /// Returns false when the run is already in flight or the queue is
    /// full; a full queue drops the id and leaves it QUEUED in the
    /// database, where the next intake tick picks it up again.
    pub fn enqueue(&self, run_id: DbId) -> bool {
        if !self.inflight.try_claim(run_id) {
            tracing::debug!(run_id, "Run already in flight; not queued again");
            return false;
        }
        match self.tx.try_send(run_id) {
            Ok(()) => {
                tracing::debug!(run_id, "Run queued for execution");
                true
            }
            Err(e) => {
                self.inflight.release(run_id);
                tracing::warn!(run_id, error = %e, "Dispatch queue rejected run");
                false
            }
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.inflight
    }
}

/// Create the dispatch queue: a handle for producers and the receiver
/// the execution loop drains.
pub fn queue(capacity: usize) -> (DispatchHandle, mpsc::Receiver<DbId>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        DispatchHandle {
            tx,
            inflight: InFlight::default(),
        },
        rx,
    )
}

/// The execution loop: drain run ids one at a time until cancelled.
///
/// Each drained id is executed to its outcome, released from the
/// in-flight set, and followed by exactly one scheduler kick, so that
/// under queue mode every terminal transition immediately considers the
/// next waiting run.
pub async fn run_loop(
    mut rx: mpsc::Receiver<DbId>,
    inflight: InFlight,
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<AdmissionScheduler>,
    cancel: CancellationToken,
) {
    tracing::info!("Run execution loop started");
    loop {
        let run_id = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Run execution loop shutting down");
                break;
            }
            id = rx.recv() => match id {
                Some(id) => id,
                None => break,
            },
        };

        let outcome = orchestrator.execute_run(run_id).await;
        inflight.release(run_id);

        match outcome {
            ExecuteOutcome::Finished {
                completed,
                message,
                image_count,
            } => {
                tracing::info!(run_id, completed, image_count, %message, "Run finished");
                scheduler.try_dispatch_next().await;
            }
            ExecuteOutcome::NotRunnable { reason } => {
                // A cancel that landed first, typically. The slot is
                // free, so let the scheduler look at the next in line.
                tracing::info!(run_id, %reason, "Run was not runnable");
                scheduler.try_dispatch_next().await;
            }
            ExecuteOutcome::Busy => {
                tracing::warn!(run_id, "Execution slot busy; run stays queued in the database");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
