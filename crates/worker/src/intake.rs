//! Intake poller: finds QUEUED runs and feeds the dispatch queue.
//!
//! A single long-lived task ticking at a fixed interval. With queue mode
//! off every queued run is dispatched as soon as a tick sees it; with
//! queue mode on the tick just kicks the admission scheduler, which owns
//! the one-at-a-time policy. The tick is also the retry path for runs
//! dropped by a full dispatch queue and for scheduler kicks lost to a
//! transient settings read failure.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::dispatch::DispatchHandle;
use crate::scheduler::AdmissionScheduler;
use crate::store::RunStore;

/// Queued runs picked up per tick when queue mode is off.
const INTAKE_BATCH: i64 = 16;

pub struct IntakeLoop {
    store: Arc<dyn RunStore>,
    dispatch: DispatchHandle,
    scheduler: Arc<AdmissionScheduler>,
    poll_interval: Duration,
}

impl IntakeLoop {
    pub fn new(
        store: Arc<dyn RunStore>,
        dispatch: DispatchHandle,
        scheduler: Arc<AdmissionScheduler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            dispatch,
            scheduler,
            poll_interval,
        }
    }

    /// Run the intake loop until the cancellation token fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Intake loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Intake loop shutting down");
                    break;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let queue_mode = match self.store.queue_mode_enabled().await {
            Ok(on) => on,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read queue-mode setting; skipping tick");
                return;
            }
        };

        if queue_mode {
            self.scheduler.try_dispatch_next().await;
            return;
        }

        let queued = match self.store.list_queued(INTAKE_BATCH).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list queued runs; skipping tick");
                return;
            }
        };
        for run in queued {
            self.dispatch.enqueue(run.id);
        }
    }
}
