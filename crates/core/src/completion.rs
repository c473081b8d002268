//! Completion heuristics for the external analysis tool.
//!
//! The tool exposes no programmatic completion signal; it is driven through
//! the OS UI layer and the only observable evidence is what it writes into
//! the task folder and how much CPU its processes burn. File count alone is
//! unreliable (the tool may pause mid-sequence) and CPU alone is unreliable
//! (it idles while a dialog is open), so success requires both signals plus
//! a minimum-runtime floor. [`evaluate`] turns one polled [`Observation`]
//! into a [`Verdict`]; the polling loop itself lives in the driver crate.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Interval between detector polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Minimum elapsed time before a success verdict is considered at all.
/// The tool needs several seconds to open the data file and start the
/// script, during which it is briefly idle.
pub const DEFAULT_MIN_RUNTIME: Duration = Duration::from_secs(20);

/// Ceiling on one attempt's runtime before it is declared timed out.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);

/// Aggregate CPU percentage below which the tool counts as idle.
pub const DEFAULT_CPU_IDLE_PCT: f64 = 5.0;

/// Consecutive polls with an unchanged artifact count required for success.
pub const DEFAULT_STABLE_POLLS: u32 = 3;

/// Max-wait at or below which relaxed thresholds apply. Short waits are
/// used by tests and smoke checks where the production floor would dominate
/// the whole budget.
pub const SHORT_WAIT_CUTOFF: Duration = Duration::from_secs(30);

/// Poll interval under relaxed thresholds.
pub const SHORT_WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Minimum-runtime floor under relaxed thresholds.
pub const SHORT_WAIT_MIN_RUNTIME: Duration = Duration::from_secs(1);

/// Stability requirement under relaxed thresholds.
pub const SHORT_WAIT_STABLE_POLLS: u32 = 2;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tunable thresholds for the completion detector.
///
/// All values are deployment configuration, not derived constants: the
/// defaults are tuned empirically for the supported tool and should be
/// re-tuned per deployment target.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub poll_interval: Duration,
    pub min_runtime: Duration,
    pub max_wait: Duration,
    pub cpu_idle_pct: f64,
    pub stable_polls_required: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            min_runtime: DEFAULT_MIN_RUNTIME,
            max_wait: DEFAULT_MAX_WAIT,
            cpu_idle_pct: DEFAULT_CPU_IDLE_PCT,
            stable_polls_required: DEFAULT_STABLE_POLLS,
        }
    }
}

impl CompletionConfig {
    /// Config for a given max-wait, relaxing the floor and stability
    /// requirement when the wait is short enough that the production
    /// values would eat the whole budget.
    pub fn for_max_wait(max_wait: Duration) -> Self {
        if max_wait <= SHORT_WAIT_CUTOFF {
            Self {
                poll_interval: SHORT_WAIT_POLL_INTERVAL,
                min_runtime: SHORT_WAIT_MIN_RUNTIME,
                max_wait,
                cpu_idle_pct: DEFAULT_CPU_IDLE_PCT,
                stable_polls_required: SHORT_WAIT_STABLE_POLLS,
            }
        } else {
            Self {
                max_wait,
                ..Self::default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// One polled snapshot of the observable evidence.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Time since the detector started watching.
    pub elapsed: Duration,
    /// Artifact files currently visible in the task folder.
    pub artifact_count: usize,
    /// Aggregate CPU percentage of processes matching the tool's name.
    pub cpu_percent: f64,
    /// Whether any process matching the tool's name exists at all.
    pub tool_running: bool,
    /// Consecutive polls for which `artifact_count` has not changed.
    pub stable_polls: u32,
}

/// Outcome of evaluating one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep polling.
    Pending,
    /// The tool finished its output sequence and went idle.
    Completed,
    /// The tool exited without producing anything. Declared early so a
    /// crashed launch does not burn the whole max-wait budget.
    ToolExited,
    /// Max-wait elapsed without a success verdict.
    TimedOut,
}

/// Evaluate one observation against the configured thresholds.
///
/// Checked in order: early tool exit, success, timeout. A vanished tool
/// with an empty folder also looks idle-and-stable, so the exit check
/// must run first or a crash would read as a quiet success. A success at
/// the exact timeout boundary is still a success.
pub fn evaluate(config: &CompletionConfig, obs: &Observation) -> Verdict {
    if obs.elapsed > config.min_runtime && obs.artifact_count == 0 && !obs.tool_running {
        return Verdict::ToolExited;
    }
    if obs.elapsed >= config.min_runtime
        && obs.cpu_percent < config.cpu_idle_pct
        && obs.stable_polls >= config.stable_polls_required
    {
        return Verdict::Completed;
    }
    if obs.elapsed >= config.max_wait {
        return Verdict::TimedOut;
    }
    Verdict::Pending
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CompletionConfig {
        CompletionConfig {
            poll_interval: Duration::from_millis(500),
            min_runtime: Duration::from_secs(10),
            max_wait: Duration::from_secs(60),
            cpu_idle_pct: 5.0,
            stable_polls_required: 3,
        }
    }

    fn obs(elapsed_secs: u64) -> Observation {
        Observation {
            elapsed: Duration::from_secs(elapsed_secs),
            artifact_count: 2,
            cpu_percent: 0.5,
            tool_running: true,
            stable_polls: 3,
        }
    }

    // -- Success --

    #[test]
    fn completes_when_idle_and_stable_past_floor() {
        assert_eq!(evaluate(&config(), &obs(15)), Verdict::Completed);
    }

    #[test]
    fn completes_at_exact_floor() {
        assert_eq!(evaluate(&config(), &obs(10)), Verdict::Completed);
    }

    #[test]
    fn floor_blocks_instant_success() {
        assert_eq!(evaluate(&config(), &obs(3)), Verdict::Pending);
    }

    #[test]
    fn success_wins_at_exact_timeout_boundary() {
        assert_eq!(evaluate(&config(), &obs(60)), Verdict::Completed);
    }

    // -- Dual signal: neither half alone is enough --

    #[test]
    fn busy_cpu_blocks_completion_despite_stable_count() {
        let o = Observation {
            cpu_percent: 45.0,
            ..obs(30)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Pending);
    }

    #[test]
    fn busy_cpu_with_stable_count_eventually_times_out() {
        let o = Observation {
            cpu_percent: 45.0,
            ..obs(60)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::TimedOut);
    }

    #[test]
    fn changing_count_blocks_completion_despite_idle_cpu() {
        let o = Observation {
            stable_polls: 0,
            ..obs(30)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Pending);
    }

    #[test]
    fn nearly_stable_count_is_still_pending() {
        let o = Observation {
            stable_polls: 2,
            ..obs(30)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Pending);
    }

    // -- Early tool exit --

    #[test]
    fn early_exit_when_no_output_and_no_process() {
        let o = Observation {
            artifact_count: 0,
            cpu_percent: 0.0,
            tool_running: false,
            stable_polls: 0,
            ..obs(11)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::ToolExited);
    }

    #[test]
    fn early_exit_requires_elapsed_past_floor() {
        let o = Observation {
            artifact_count: 0,
            cpu_percent: 0.0,
            tool_running: false,
            stable_polls: 0,
            ..obs(5)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Pending);
    }

    #[test]
    fn exited_tool_with_output_is_not_an_early_exit() {
        // One artifact exists, so the exit is judged by the normal
        // idle-and-stable path instead.
        let o = Observation {
            artifact_count: 1,
            cpu_percent: 0.0,
            tool_running: false,
            stable_polls: 3,
            ..obs(15)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Completed);
    }

    #[test]
    fn dead_tool_with_empty_folder_is_an_exit_not_a_quiet_success() {
        // Zero CPU and an unchanging zero count satisfy the success
        // predicate too; the exit check must take priority.
        let o = Observation {
            artifact_count: 0,
            cpu_percent: 0.0,
            tool_running: false,
            stable_polls: 5,
            ..obs(11)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::ToolExited);
    }

    #[test]
    fn exact_floor_is_not_past_it_for_early_exit() {
        let o = Observation {
            artifact_count: 0,
            cpu_percent: 20.0,
            tool_running: false,
            stable_polls: 0,
            ..obs(10)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Pending);
    }

    // -- Timeout --

    #[test]
    fn times_out_at_max_wait() {
        let o = Observation {
            cpu_percent: 80.0,
            stable_polls: 0,
            ..obs(60)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::TimedOut);
    }

    #[test]
    fn pending_just_under_max_wait() {
        let o = Observation {
            cpu_percent: 80.0,
            stable_polls: 0,
            ..obs(59)
        };
        assert_eq!(evaluate(&config(), &o), Verdict::Pending);
    }

    // -- Threshold relaxation --

    #[test]
    fn short_max_wait_relaxes_thresholds() {
        let c = CompletionConfig::for_max_wait(Duration::from_secs(5));
        assert_eq!(c.max_wait, Duration::from_secs(5));
        assert_eq!(c.min_runtime, SHORT_WAIT_MIN_RUNTIME);
        assert_eq!(c.stable_polls_required, SHORT_WAIT_STABLE_POLLS);
        assert_eq!(c.poll_interval, SHORT_WAIT_POLL_INTERVAL);
    }

    #[test]
    fn long_max_wait_keeps_production_thresholds() {
        let c = CompletionConfig::for_max_wait(Duration::from_secs(300));
        assert_eq!(c.max_wait, Duration::from_secs(300));
        assert_eq!(c.min_runtime, DEFAULT_MIN_RUNTIME);
        assert_eq!(c.stable_polls_required, DEFAULT_STABLE_POLLS);
        assert_eq!(c.poll_interval, DEFAULT_POLL_INTERVAL);
    }

    #[test]
    fn cutoff_itself_is_relaxed() {
        let c = CompletionConfig::for_max_wait(SHORT_WAIT_CUTOFF);
        assert_eq!(c.min_runtime, SHORT_WAIT_MIN_RUNTIME);
    }
}
