//! Completion detector: the polling loop around the pure verdict.
//!
//! The loop owns the wall clock and the stability counter; every
//! threshold decision is delegated to
//! [`statrig_core::completion::evaluate`] so the policy stays testable
//! without time. An artifact-count change resets the stability streak
//! and is surfaced to subscribers as a progress event.

use std::path::Path;

use statrig_core::completion::{self, CompletionConfig, Observation, Verdict};
use statrig_core::lifecycle;
use statrig_core::lifecycle::state_machine::status_name;
use statrig_core::types::DbId;
use statrig_events::{EventBus, RunEvent, RunEventType};
use tokio::time::Instant;

use crate::probe::CompletionProbe;

/// Final word from one detection watch.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    /// Whether the tool was observed finishing its output sequence.
    pub completed: bool,
    /// Human-readable account of how the watch ended.
    pub message: String,
    /// Artifact count at the final poll.
    pub artifact_count: usize,
}

/// Watches one attempt until the evidence yields a verdict.
pub struct CompletionDetector {
    config: CompletionConfig,
}

impl CompletionDetector {
    pub fn new(config: CompletionConfig) -> Self {
        Self { config }
    }

    /// Poll until the verdict leaves `Pending`. Publishes a progress
    /// event at every observed artifact-count change; publishing is
    /// fire-and-forget and never blocks the loop.
    pub async fn wait(
        &self,
        run_id: DbId,
        folder: &Path,
        probe: &dyn CompletionProbe,
        bus: &EventBus,
    ) -> CompletionOutcome {
        let started = Instant::now();
        let mut last_count: usize = 0;
        let mut stable_polls: u32 = 0;

        loop {
            tokio::time::sleep(self.config.poll_interval).await;

            let sample = probe.poll(folder).await;
            if sample.artifact_count != last_count {
                stable_polls = 0;
                tracing::debug!(
                    run_id,
                    from = last_count,
                    to = sample.artifact_count,
                    "Artifact count changed"
                );
                bus.publish(
                    RunEvent::new(
                        RunEventType::RunProgress,
                        run_id,
                        status_name(lifecycle::STATUS_RUNNING),
                        format!("{} output file(s) in task folder", sample.artifact_count),
                    )
                    .with_image_count(sample.artifact_count)
                    .with_task_dir(folder.to_string_lossy()),
                );
                last_count = sample.artifact_count;
            } else {
                stable_polls += 1;
            }

            let obs = Observation {
                elapsed: started.elapsed(),
                artifact_count: sample.artifact_count,
                cpu_percent: sample.cpu_percent,
                tool_running: sample.tool_running,
                stable_polls,
            };
            match completion::evaluate(&self.config, &obs) {
                Verdict::Pending => continue,
                Verdict::Completed => {
                    return CompletionOutcome {
                        completed: true,
                        message: format!(
                            "Tool went idle with {} output file(s) after {}s",
                            sample.artifact_count,
                            obs.elapsed.as_secs()
                        ),
                        artifact_count: sample.artifact_count,
                    };
                }
                Verdict::ToolExited => {
                    return CompletionOutcome {
                        completed: false,
                        message: format!(
                            "Tool exited without producing output after {}s",
                            obs.elapsed.as_secs()
                        ),
                        artifact_count: sample.artifact_count,
                    };
                }
                Verdict::TimedOut => {
                    return CompletionOutcome {
                        completed: false,
                        message: format!(
                            "No completion after the configured {}s wait; {} output file(s) visible",
                            self.config.max_wait.as_secs(),
                            sample.artifact_count
                        ),
                        artifact_count: sample.artifact_count,
                    };
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
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays a fixed sample sequence, then repeats the last one.
    struct ScriptedProbe {
        samples: Mutex<Vec<ProbeSample>>,
    }

    impl ScriptedProbe {
        fn new(samples: Vec<ProbeSample>) -> Self {
            Self {
                samples: Mutex::new(samples),
            }
        }
    }

    #[async_trait]
    impl CompletionProbe for ScriptedProbe {
        async fn poll(&self, _folder: &Path) -> ProbeSample {
            let mut samples = self.samples.lock().unwrap();
            if samples.len() > 1 {
                samples.remove(0)
            } else {
                samples[0]
            }
        }
    }

    fn busy(count: usize) -> ProbeSample {
        ProbeSample {
            artifact_count: count,
            cpu_percent: 85.0,
            tool_running: true,
        }
    }

    fn idle(count: usize) -> ProbeSample {
        ProbeSample {
            artifact_count: count,
            cpu_percent: 0.5,
            tool_running: true,
        }
    }

    // The floor is deliberately not a multiple of the poll interval, so
    // no poll lands exactly on it.
    fn test_config() -> CompletionConfig {
        CompletionConfig {
            poll_interval: Duration::from_secs(1),
            min_runtime: Duration::from_millis(2500),
            max_wait: Duration::from_secs(20),
            cpu_idle_pct: 5.0,
            stable_polls_required: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_tool_with_stable_output_completes() {
        let probe = ScriptedProbe::new(vec![busy(0), busy(2), idle(2), idle(2), idle(2)]);
        let bus = EventBus::default();
        let outcome = CompletionDetector::new(test_config())
            .wait(1, &PathBuf::from("/t"), &probe, &bus)
            .await;
        assert!(outcome.completed);
        assert_eq!(outcome.artifact_count, 2);
        assert!(outcome.message.contains("idle"));
    }

    #[tokio::test(start_paused = true)]
    async fn count_changes_reset_the_stability_streak() {
        // Output keeps trickling in; the streak never reaches two until
        // the counts finally settle.
        let probe = ScriptedProbe::new(vec![
            idle(1),
            idle(2),
            idle(3),
            idle(4),
            idle(4),
            idle(4),
        ]);
        let bus = EventBus::default();
        let outcome = CompletionDetector::new(test_config())
            .wait(1, &PathBuf::from("/t"), &probe, &bus)
            .await;
        assert!(outcome.completed);
        assert_eq!(outcome.artifact_count, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn busy_tool_never_completes_and_times_out() {
        let probe = ScriptedProbe::new(vec![busy(2)]);
        let bus = EventBus::default();
        let outcome = CompletionDetector::new(test_config())
            .wait(1, &PathBuf::from("/t"), &probe, &bus)
            .await;
        assert!(!outcome.completed);
        assert!(outcome.message.contains("20s"));
        assert!(outcome.message.contains("2 output file(s)"));
        assert_eq!(outcome.artifact_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn churning_output_never_completes_and_times_out() {
        // Count changes every poll with an idle CPU; stability is never
        // reached, so the watch runs out the clock.
        let samples: Vec<ProbeSample> = (0..40).map(idle).collect();
        let probe = ScriptedProbe::new(samples);
        let bus = EventBus::default();
        let outcome = CompletionDetector::new(test_config())
            .wait(1, &PathBuf::from("/t"), &probe, &bus)
            .await;
        assert!(!outcome.completed);
        assert!(outcome.message.contains("configured 20s wait"));
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_tool_with_no_output_fails_early() {
        let gone = ProbeSample {
            artifact_count: 0,
            cpu_percent: 0.0,
            tool_running: false,
        };
        let probe = ScriptedProbe::new(vec![gone]);
        let bus = EventBus::default();
        let started = tokio::time::Instant::now();
        let outcome = CompletionDetector::new(test_config())
            .wait(1, &PathBuf::from("/t"), &probe, &bus)
            .await;
        assert!(!outcome.completed);
        assert!(outcome.message.contains("exited without producing output"));
        // Declared right after the runtime floor, nowhere near max-wait.
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_event_fires_once_per_count_change() {
        let probe = ScriptedProbe::new(vec![busy(0), busy(2), idle(2), idle(2), idle(2)]);
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let outcome = CompletionDetector::new(test_config())
            .wait(9, &PathBuf::from("/tasks/9"), &probe, &bus)
            .await;
        assert!(outcome.completed);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, RunEventType::RunProgress);
        assert_eq!(event.run_id, 9);
        assert_eq!(event.image_count, Some(2));
        assert_eq!(event.task_dir.as_deref(), Some("/tasks/9"));
        // The two stable polls after the change emit nothing.
        assert!(rx.try_recv().is_err());
    }
}
