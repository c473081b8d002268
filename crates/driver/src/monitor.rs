//! Liveness monitor for a running attempt.
//!
//! Scheduled independently from the completion detector so subscribers
//! keep seeing signs of life even when detection is wedged in a long
//! poll. Purely observational: publishes events, never touches durable
//! state, and is always safe to kill.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use statrig_core::lifecycle;
use statrig_core::lifecycle::state_machine::status_name;
use statrig_core::types::DbId;
use statrig_events::{EventBus, RunEvent, RunEventType};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::probe::CompletionProbe;

/// How often the monitor looks at the folder.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Quiet ticks between heartbeats when nothing changes.
pub const HEARTBEAT_TICKS: u32 = 6;

/// How long a stop waits for the loop to notice cancellation before the
/// task is aborted outright.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

pub struct ProgressMonitor {
    interval: Duration,
}

impl ProgressMonitor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Spawn the monitor loop. It runs until `cancel` fires; stop it
    /// through [`stop_monitor`] so a wedged probe cannot outlive the
    /// attempt.
    pub fn spawn(
        self,
        run_id: DbId,
        folder: PathBuf,
        probe: Arc<dyn CompletionProbe>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_count: Option<usize> = None;
            let mut quiet_ticks: u32 = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.interval) => {}
                }

                let sample = probe.poll(&folder).await;
                let changed = last_count != Some(sample.artifact_count);
                if changed {
                    quiet_ticks = 0;
                    last_count = Some(sample.artifact_count);
                    bus.publish(
                        RunEvent::new(
                            RunEventType::RunProgress,
                            run_id,
                            status_name(lifecycle::STATUS_RUNNING),
                            format!(
                                "Watching task folder: {} output file(s)",
                                sample.artifact_count
                            ),
                        )
                        .with_image_count(sample.artifact_count)
                        .with_task_dir(folder.to_string_lossy()),
                    );
                    continue;
                }

                quiet_ticks += 1;
                if quiet_ticks >= HEARTBEAT_TICKS {
                    quiet_ticks = 0;
                    bus.publish(
                        RunEvent::new(
                            RunEventType::RunProgress,
                            run_id,
                            status_name(lifecycle::STATUS_RUNNING),
                            format!(
                                "Still watching; {} output file(s), tool {}",
                                sample.artifact_count,
                                if sample.tool_running { "running" } else { "absent" }
                            ),
                        )
                        .with_image_count(sample.artifact_count)
                        .with_task_dir(folder.to_string_lossy()),
                    );
                }
            }
            tracing::debug!(run_id, "Progress monitor stopped");
        })
    }
}

impl Default for ProgressMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_MONITOR_INTERVAL)
    }
}

/// Stop a spawned monitor: signal cancellation, wait out a short grace
/// period, then abort. Join errors from an abort or a panicked tick are
/// logged and absorbed; a broken monitor must never sink the attempt it
/// was narrating.
pub async fn stop_monitor(handle: JoinHandle<()>, cancel: &CancellationToken) {
    cancel.cancel();
    let mut handle = handle;
    match tokio::time::timeout(STOP_GRACE, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Progress monitor ended abnormally");
        }
        Err(_) => {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::warn!(error = %e, "Progress monitor abort");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeSample;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    struct SequenceProbe {
        counts: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl CompletionProbe for SequenceProbe {
        async fn poll(&self, _folder: &Path) -> ProbeSample {
            let mut counts = self.counts.lock().unwrap();
            let count = if counts.len() > 1 {
                counts.remove(0)
            } else {
                counts[0]
            };
            ProbeSample {
                artifact_count: count,
                cpu_percent: 50.0,
                tool_running: true,
            }
        }
    }

    /// Never returns from a poll; models a wedged filesystem.
    struct StuckProbe;

    #[async_trait]
    impl CompletionProbe for StuckProbe {
        async fn poll(&self, _folder: &Path) -> ProbeSample {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_on_count_changes_and_stops_cleanly() {
        let probe = Arc::new(SequenceProbe {
            counts: Mutex::new(vec![0, 0, 3]),
        });
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();

        let handle = ProgressMonitor::new(Duration::from_secs(1)).spawn(
            4,
            PathBuf::from("/tasks/4"),
            probe,
            bus.clone(),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(3500)).await;
        stop_monitor(handle, &cancel).await;

        // First poll establishes the count, third poll changes it.
        let first = rx.try_recv().unwrap();
        assert_eq!(first.image_count, Some(0));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.image_count, Some(3));
        assert_eq!(second.run_id, 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stretch_emits_a_heartbeat() {
        let probe = Arc::new(SequenceProbe {
            counts: Mutex::new(vec![1]),
        });
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let cancel = CancellationToken::new();

        let handle = ProgressMonitor::new(Duration::from_secs(1)).spawn(
            5,
            PathBuf::from("/tasks/5"),
            probe,
            bus.clone(),
            cancel.clone(),
        );

        // Tick 1 reports the initial count; ticks 2..=7 are quiet, the
        // seventh quiet tick is the heartbeat.
        tokio::time::sleep(Duration::from_millis(7500)).await;
        stop_monitor(handle, &cancel).await;

        let initial = rx.try_recv().unwrap();
        assert!(initial.message.contains("1 output file(s)"));
        let heartbeat = rx.try_recv().unwrap();
        assert!(heartbeat.message.contains("Still watching"));
        assert!(heartbeat.message.contains("tool running"));
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_probe_is_aborted_not_awaited_forever() {
        let bus = Arc::new(EventBus::default());
        let cancel = CancellationToken::new();
        let handle = ProgressMonitor::new(Duration::from_millis(10)).spawn(
            6,
            PathBuf::from("/tasks/6"),
            Arc::new(StuckProbe),
            bus,
            cancel.clone(),
        );

        // Let the loop enter the stuck poll, then stop. The call must
        // come back instead of hanging on the join.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_monitor(handle, &cancel).await;
    }
}
