//! Queue-mode admission: at most one run in flight, oldest first.
//!
//! Queue mode is a live toggle in the settings table, read at every
//! decision point. Off, the scheduler does nothing and runs are
//! dispatched as intake finds them. On, [`AdmissionScheduler::try_dispatch_next`]
//! advances a strict FIFO line by creation time, one run per terminal
//! transition.
//!
//! The concurrency check is read-then-act, not a lock: the local
//! in-flight set covers this worker, the RUNNING row count covers
//! anything marked running elsewhere, and the settle delay narrows the
//! window between check and dispatch. A determined race can still slip
//! through; the orchestrator's single-flight permit is the backstop.

use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::{DispatchHandle, InFlight};
use crate::store::RunStore;

/// Pause between a terminal transition and the next dispatch, letting
/// the previous attempt's tool process exit and its folder flush.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Extra countdown ticks after the settle delay.
pub const COUNTDOWN_TICKS: u32 = 3;

/// Length of one countdown tick.
pub const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

pub struct AdmissionScheduler {
    store: Arc<dyn RunStore>,
    dispatch: DispatchHandle,
    inflight: InFlight,
    settle_delay: Duration,
}

impl AdmissionScheduler {
    pub fn new(store: Arc<dyn RunStore>, dispatch: DispatchHandle, settle_delay: Duration) -> Self {
        let inflight = dispatch.in_flight().clone();
        Self {
            store,
            dispatch,
            inflight,
            settle_delay,
        }
    }

    /// Consider dispatching the next queued run.
    ///
    /// No-op when queue mode is off, when anything is already in flight
    /// or marked RUNNING, or when the queue is empty. Setting reads and
    /// row counts that fail are treated as "not now" and logged; the
    /// next terminal transition or intake tick will try again.
    pub async fn try_dispatch_next(&self) {
        match self.store.queue_mode_enabled().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read queue-mode setting; skipping dispatch");
                return;
            }
        }

        if !self.inflight.is_empty() {
            tracing::debug!(
                in_flight = self.inflight.len(),
                "Queue mode: a run is already in flight"
            );
            return;
        }
        match self.store.count_running().await {
            Ok(0) => {}
            Ok(running) => {
                tracing::debug!(running, "Queue mode: RUNNING rows exist; not dispatching");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not count running runs; skipping dispatch");
                return;
            }
        }

        let run = match self.store.oldest_queued().await {
            Ok(Some(run)) => run,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read the run queue; skipping dispatch");
                return;
            }
        };

        // Give the previous attempt's process and folder time to wind
        // down before the next automation sequence starts.
        tokio::time::sleep(self.settle_delay).await;
        for remaining in (1..=COUNTDOWN_TICKS).rev() {
            tracing::debug!(run_id = run.id, remaining, "Dispatching next queued run");
            tokio::time::sleep(COUNTDOWN_TICK).await;
        }

        if self.dispatch.enqueue(run.id) {
            tracing::info!(
                run_id = run.id,
                task_name = %run.task_name,
                "Queue mode dispatched next run"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
