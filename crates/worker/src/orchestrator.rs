//! Execution of a single run: admission, preconditions, driving the
//! tool, and the one terminal write.
//!
//! The orchestrator is the only component that writes durable run state.
//! A run admitted here either finishes with exactly one terminal commit
//! or is refused up front without touching the row. The drive itself is
//! delegated to an [`AttemptRunner`] so the whole flow is testable
//! without a desktop session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use statrig_core::artifacts::{
    mime_type_for, DATA_FILE_NAME, FAILURE_IMAGE_NAME, KIND_INPUT_DATA, KIND_INPUT_SCRIPT,
    KIND_OCR_SUMMARY, KIND_OCR_TEXT, KIND_OUTPUT_IMAGE, OCR_SUMMARY_FILE_NAME, SCRIPT_FILE_NAME,
};
use statrig_core::completion::CompletionConfig;
use statrig_core::lifecycle;
use statrig_core::lifecycle::state_machine::status_name;
use statrig_core::types::{DbId, Timestamp};
use statrig_db::models::artifact::CreateArtifact;
use statrig_db::models::run::TerminalUpdate;
use statrig_db::models::status::RunStatus;
use statrig_driver::monitor::{self, ProgressMonitor, DEFAULT_MONITOR_INTERVAL};
use statrig_driver::probe::CompletionProbe;
use statrig_driver::process::{ProcessControl, ShellProcessControl};
use statrig_driver::taskfolder;
use statrig_driver::{failure, AttemptReport, DriverConfig, RunContext, ToolDriver};
use statrig_events::{EventBus, RunEvent, RunEventType};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::store::{CommitOutcome, RunStore};

// ---------------------------------------------------------------------------
// AttemptRunner
// ---------------------------------------------------------------------------

/// Seam between the orchestrator and the tool driver.
///
/// Production wires a [`DriverRunner`]; tests substitute a scripted
/// runner and never open anything.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    /// Drive one attempt to its report. `max_wait` is the live ceiling
    /// from the settings table, when one is set.
    async fn run_attempt(&self, ctx: RunContext, max_wait: Option<Duration>) -> AttemptReport;

    /// Tear the tool down outside a normal attempt. Called when an
    /// attempt task died before its own teardown could run.
    async fn cleanup(&self) {}
}

/// Production runner: a fresh [`ToolDriver`] per attempt, with the
/// completion ceiling lowered to any live override.
pub struct DriverRunner {
    config: DriverConfig,
    bus: Arc<EventBus>,
}

impl DriverRunner {
    pub fn new(config: DriverConfig, bus: Arc<EventBus>) -> Self {
        Self { config, bus }
    }
}

#[async_trait]
impl AttemptRunner for DriverRunner {
    async fn run_attempt(&self, ctx: RunContext, max_wait: Option<Duration>) -> AttemptReport {
        let mut config = self.config.clone();
        if let Some(max_wait) = max_wait {
            config.completion = CompletionConfig::for_max_wait(max_wait);
        }
        let driver = ToolDriver::with_defaults(config, Arc::clone(&self.bus));
        driver.run(&ctx).await
    }

    async fn cleanup(&self) {
        let control = ShellProcessControl::new(
            self.config.process_name.clone(),
            self.config.quit_command.clone(),
        );
        control.terminate().await;
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Outcome of an execution request.
#[derive(Debug)]
pub enum ExecuteOutcome {
    /// The attempt ran and was committed (or the commit was refused by a
    /// concurrent settle; the attempt still finished).
    Finished {
        completed: bool,
        message: String,
        image_count: usize,
    },
    /// Another attempt holds the single-flight permit.
    Busy,
    /// The run was not in a runnable state; nothing was written.
    NotRunnable { reason: String },
}

/// How the single terminal write went.
enum CommitResult {
    Committed,
    /// The guard refused: the row settled elsewhere (cancel, typically).
    Refused,
    /// Two write attempts failed; the outcome lives only in events and
    /// on disk.
    Abandoned,
}

/// Drives queued runs to a terminal state, one at a time.
pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    runner: Arc<dyn AttemptRunner>,
    probe: Arc<dyn CompletionProbe>,
    bus: Arc<EventBus>,
    task_root: PathBuf,
    monitor_interval: Duration,
    permit: Semaphore,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RunStore>,
        runner: Arc<dyn AttemptRunner>,
        probe: Arc<dyn CompletionProbe>,
        bus: Arc<EventBus>,
        task_root: PathBuf,
    ) -> Self {
        Self {
            store,
            runner,
            probe,
            bus,
            task_root,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            permit: Semaphore::new(1),
        }
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Execute one run end to end.
    ///
    /// Admission requires the run to exist and still be QUEUED; anything
    /// else is refused without a write, so a cancel that lands first
    /// sticks. Precondition failures (missing folder key, unusable
    /// folder) are committed FAILED without ever launching the tool.
    pub async fn execute_run(&self, run_id: DbId) -> ExecuteOutcome {
        // One attempt at a time. The external tool is a desktop
        // singleton; two attempts would fight over it.
        let Ok(_permit) = self.permit.try_acquire() else {
            tracing::warn!(run_id, "Execution refused; another attempt is in flight");
            return ExecuteOutcome::Busy;
        };

        let run = match self.store.load(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                return ExecuteOutcome::NotRunnable {
                    reason: format!("run {run_id} not found"),
                }
            }
            Err(error) => {
                tracing::warn!(run_id, %error, "Could not load run for execution");
                return ExecuteOutcome::NotRunnable {
                    reason: format!("run {run_id} could not be loaded: {error}"),
                };
            }
        };
        if run.status_id != lifecycle::STATUS_QUEUED {
            return ExecuteOutcome::NotRunnable {
                reason: format!(
                    "run {run_id} is {}, not {}",
                    status_name(run.status_id),
                    status_name(lifecycle::STATUS_QUEUED)
                ),
            };
        }

        let started_at = Utc::now();

        let Some(task_id) = run.external_task_id.filter(|id| !id.is_empty()) else {
            let message = "No task folder was provisioned for this run".to_string();
            return self.fail_before_launch(run_id, None, started_at, message).await;
        };

        let ctx = RunContext {
            run_id,
            folder: self.task_root.join(&task_id),
            task_id,
            data_file: DATA_FILE_NAME.into(),
            script_file: SCRIPT_FILE_NAME.into(),
        };

        // The folder must be usable and the script must open the right
        // data file before anything launches.
        if let Err(error) = taskfolder::verify(&ctx.folder, &ctx.data_file, &ctx.script_file).await
        {
            let message = format!("Task folder rejected: {error}");
            return self.fail_before_launch(run_id, Some(&ctx), started_at, message).await;
        }
        match taskfolder::ensure_open_data_header(
            &ctx.folder,
            &ctx.data_file,
            &ctx.script_file,
            run_id,
        )
        .await
        {
            Ok(rewritten) => {
                if rewritten {
                    tracing::info!(run_id, "Rewrote script header to open the task data file");
                }
            }
            Err(error) => {
                let message = format!("Could not prepare the analysis script: {error}");
                return self.fail_before_launch(run_id, Some(&ctx), started_at, message).await;
            }
        }

        self.bus.publish(
            RunEvent::new(
                RunEventType::TaskPrepared,
                run_id,
                status_name(lifecycle::STATUS_QUEUED),
                "Task folder verified and script prepared",
            )
            .with_task_dir(ctx.folder.display().to_string()),
        );
        self.bus.publish(RunEvent::new(
            RunEventType::RunStarted,
            run_id,
            status_name(lifecycle::STATUS_RUNNING),
            format!("Executing task {}", ctx.task_id),
        ));

        // Live ceiling, read at the moment of use. Unreadable settings
        // fall back to the configured default rather than blocking.
        let max_wait = match self.store.max_wait_secs().await {
            Ok(secs) => secs.map(Duration::from_secs),
            Err(error) => {
                tracing::warn!(run_id, %error, "Could not read max-wait override; using default");
                None
            }
        };

        let report = self.drive(&ctx, max_wait).await;

        self.register_artifacts(&ctx, &report).await;

        let status = if report.completed {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        let update = TerminalUpdate {
            status,
            message: report.message.clone(),
            image_count: report.completed.then_some(report.images.len() as i32),
            external_task_id: None,
            started_at,
        };
        let commit = self.commit_terminal_once(run_id, &update).await;

        if !matches!(commit, CommitResult::Refused) {
            let (event_type, status_id) = if report.completed {
                (RunEventType::RunCompleted, lifecycle::STATUS_SUCCEEDED)
            } else {
                (RunEventType::RunFailed, lifecycle::STATUS_FAILED)
            };
            let mut event = RunEvent::new(
                event_type,
                run_id,
                status_name(status_id),
                report.message.clone(),
            )
            .with_image_count(report.images.len())
            .with_task_dir(ctx.folder.display().to_string());
            if !report.completed {
                event = event.with_artifact(FAILURE_IMAGE_NAME);
            }
            self.bus.publish(event);
        }

        ExecuteOutcome::Finished {
            completed: report.completed,
            message: report.message,
            image_count: report.images.len(),
        }
    }

    /// Run the attempt in its own task so a panic inside the driver
    /// cannot take the worker down. An aborted attempt is folded into a
    /// failed report, with the teardown re-run and a failure card in
    /// place of whatever the attempt left behind.
    ///
    /// The progress monitor brackets the attempt: spawned before the
    /// driver starts, stopped once it returns, grace period then abort.
    /// A wedged or panicked monitor is absorbed in [`monitor::stop_monitor`]
    /// and never reaches this function's caller.
    async fn drive(&self, ctx: &RunContext, max_wait: Option<Duration>) -> AttemptReport {
        let cancel = CancellationToken::new();
        let monitor_handle = ProgressMonitor::new(self.monitor_interval).spawn(
            ctx.run_id,
            ctx.folder.clone(),
            Arc::clone(&self.probe),
            Arc::clone(&self.bus),
            cancel.clone(),
        );

        let runner = Arc::clone(&self.runner);
        let task_ctx = ctx.clone();
        let handle = tokio::spawn(async move { runner.run_attempt(task_ctx, max_wait).await });
        let joined = handle.await;

        monitor::stop_monitor(monitor_handle, &cancel).await;

        match joined {
            Ok(report) => report,
            Err(error) => {
                tracing::error!(
                    run_id = ctx.run_id,
                    %error,
                    "Attempt task died; synthesizing a failed report"
                );
                self.runner.cleanup().await;
                let message = "Attempt aborted by an internal error in the tool driver".to_string();
                let card = failure::generate(&ctx.folder, &message);
                AttemptReport {
                    completed: false,
                    message,
                    images: vec![card],
                    ocr_texts: Vec::new(),
                    ocr_summary: ctx.folder.join(OCR_SUMMARY_FILE_NAME),
                }
            }
        }
    }

    /// Commit FAILED for a run that never launched, then report it.
    ///
    /// When a task folder exists the failure still leaves its diagnostic
    /// card there, registered like any other image, so subscribers see
    /// one regardless of how early the run died. Without a folder
    /// (missing task id) there is nowhere to put one.
    async fn fail_before_launch(
        &self,
        run_id: DbId,
        ctx: Option<&RunContext>,
        started_at: Timestamp,
        message: String,
    ) -> ExecuteOutcome {
        tracing::warn!(run_id, %message, "Run failed before launch");

        let mut card_written = false;
        if let Some(ctx) = ctx {
            let card = failure::generate(&ctx.folder, &message);
            // Rows only for files durably on disk; the render itself
            // can fail when the folder path is bad.
            if tokio::fs::try_exists(&card).await.unwrap_or(false) {
                card_written = true;
                let input = CreateArtifact {
                    kind: KIND_OUTPUT_IMAGE.to_string(),
                    storage_key: format!("{}/{}", ctx.task_id, FAILURE_IMAGE_NAME),
                    file_name: FAILURE_IMAGE_NAME.to_string(),
                    mime_type: mime_type_for(FAILURE_IMAGE_NAME).to_string(),
                };
                if let Err(error) = self.store.register_artifact(run_id, &input).await {
                    tracing::warn!(run_id, %error, "Could not register failure card row");
                }
            }
        }

        let update = TerminalUpdate {
            status: RunStatus::Failed,
            message: message.clone(),
            image_count: None,
            external_task_id: None,
            started_at,
        };
        let commit = self.commit_terminal_once(run_id, &update).await;
        if !matches!(commit, CommitResult::Refused) {
            let mut event = RunEvent::new(
                RunEventType::RunFailed,
                run_id,
                status_name(lifecycle::STATUS_FAILED),
                message.clone(),
            );
            if card_written {
                event = event.with_artifact(FAILURE_IMAGE_NAME).with_image_count(1);
            }
            self.bus.publish(event);
        }
        ExecuteOutcome::Finished {
            completed: false,
            message,
            image_count: usize::from(card_written),
        }
    }

    /// The single terminal write, with one retry on infrastructure
    /// error. A second failure is logged and swallowed: the files and
    /// events already tell the story, and retrying forever would wedge
    /// the queue behind a dead database.
    async fn commit_terminal_once(&self, run_id: DbId, update: &TerminalUpdate) -> CommitResult {
        for attempt in 0..2 {
            match self.store.commit_terminal(run_id, update).await {
                Ok(CommitOutcome::Committed(run)) => {
                    tracing::info!(
                        run_id,
                        status = status_name(run.status_id),
                        "Run committed"
                    );
                    return CommitResult::Committed;
                }
                Ok(CommitOutcome::Refused) => {
                    tracing::warn!(
                        run_id,
                        "Terminal write refused; the run was settled elsewhere"
                    );
                    return CommitResult::Refused;
                }
                Err(error) if attempt == 0 => {
                    tracing::warn!(run_id, %error, "Terminal write failed; retrying once");
                }
                Err(error) => {
                    tracing::error!(run_id, %error, "Terminal write failed twice; giving up");
                }
            }
        }
        CommitResult::Abandoned
    }

    /// Record the attempt's files as artifact rows, best-effort. The
    /// files are on disk regardless; a failed row never fails the run.
    /// Inputs are registered alongside outputs so the run's artifact
    /// set reproduces the whole attempt, not just its results.
    async fn register_artifacts(&self, ctx: &RunContext, report: &AttemptReport) {
        let mut entries: Vec<(PathBuf, &str)> = Vec::new();
        for (file, kind) in [
            (&ctx.data_file, KIND_INPUT_DATA),
            (&ctx.script_file, KIND_INPUT_SCRIPT),
        ] {
            let path = ctx.folder.join(file);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                entries.push((path, kind));
            }
        }
        for path in &report.images {
            entries.push((path.clone(), KIND_OUTPUT_IMAGE));
        }
        for path in &report.ocr_texts {
            entries.push((path.clone(), KIND_OCR_TEXT));
        }
        if tokio::fs::try_exists(&report.ocr_summary)
            .await
            .unwrap_or(false)
        {
            entries.push((report.ocr_summary.clone(), KIND_OCR_SUMMARY));
        }

        for (path, kind) in entries {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let input = CreateArtifact {
                kind: kind.to_string(),
                storage_key: format!("{}/{}", ctx.task_id, file_name),
                file_name: file_name.to_string(),
                mime_type: mime_type_for(file_name).to_string(),
            };
            if let Err(error) = self.store.register_artifact(ctx.run_id, &input).await {
                tracing::warn!(
                    run_id = ctx.run_id,
                    file_name,
                    %error,
                    "Could not register artifact row"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
