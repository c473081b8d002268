//! One end-to-end attempt against the external tool.
//!
//! The driver owns the happy path and every way it bends: verify the
//! folder, open the tool, trigger execution, watch for completion, tear
//! the tool down, gate the output. Teardown and gating run on every
//! exit path, because a leftover tool instance or an unvetted folder
//! would poison the next attempt. The driver reports, it never decides
//! durable state; that is the orchestrator's job.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use statrig_core::artifacts::FAILURE_IMAGE_NAME;
use statrig_core::completion::CompletionConfig;
use statrig_core::lifecycle;
use statrig_core::lifecycle::state_machine::status_name;
use statrig_core::types::DbId;
use statrig_events::{EventBus, RunEvent, RunEventType};
use thiserror::Error;

use crate::automation::{
    self, Automation, AutomationContext, AutomationStrategy, ShellAutomation,
    DEFAULT_AUTOMATION_TIMEOUT,
};
use crate::completion::{CompletionDetector, CompletionOutcome};
use crate::failure;
use crate::launch::{
    self, AppLauncher, LaunchError, ShellLauncher, DEFAULT_OPENER, LAUNCH_RETRY_BACKOFF,
    MAX_LAUNCH_ATTEMPTS,
};
use crate::ocr::{TesseractExtractor, TextExtractor};
use crate::postprocess::{OcrGateReport, PostProcessor};
use crate::probe::{CompletionProbe, FolderProbe};
use crate::process::{ProcessControl, ShellProcessControl, DEFAULT_PROCESS_NAME};
use crate::taskfolder::{self, FolderError};

/// Pause between a successful open and the first automation attempt.
/// The tool paints its main window well after the opener returns.
pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_secs(8);

/// Everything tunable about one attempt.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Explicit application name tried before the built-in candidates.
    pub app_override: Option<String>,
    /// Opener program handing documents to applications.
    pub opener: String,
    /// Process name used for sampling and termination.
    pub process_name: String,
    /// Native quit invocation (program plus args), run before the kill.
    pub quit_command: Vec<String>,
    pub startup_delay: Duration,
    /// Pause between transient launch retries.
    pub launch_backoff: Duration,
    /// Upper bound for one automation helper invocation.
    pub automation_timeout: Duration,
    /// Automation strategies in priority order.
    pub strategies: Vec<AutomationStrategy>,
    /// Completion thresholds for this attempt.
    pub completion: CompletionConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            app_override: None,
            opener: DEFAULT_OPENER.into(),
            process_name: DEFAULT_PROCESS_NAME.into(),
            quit_command: vec![
                "osascript".into(),
                "-e".into(),
                format!("quit app \"{DEFAULT_PROCESS_NAME}\""),
            ],
            startup_delay: DEFAULT_STARTUP_DELAY,
            launch_backoff: LAUNCH_RETRY_BACKOFF,
            automation_timeout: DEFAULT_AUTOMATION_TIMEOUT,
            strategies: automation::default_strategies(),
            completion: CompletionConfig::default(),
        }
    }
}

/// Identity and layout of the attempt being driven.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: DbId,
    /// External task identifier the folder was prepared under.
    pub task_id: String,
    /// The task folder; inputs live here and outputs appear here.
    pub folder: PathBuf,
    /// Data file name inside the folder.
    pub data_file: String,
    /// Script file name inside the folder.
    pub script_file: String,
}

impl RunContext {
    pub fn script_path(&self) -> PathBuf {
        self.folder.join(&self.script_file)
    }
}

/// What one attempt amounted to. `images` is the post-gate visible set;
/// for failed attempts it includes exactly one failure card.
#[derive(Debug)]
pub struct AttemptReport {
    pub completed: bool,
    pub message: String,
    pub images: Vec<PathBuf>,
    pub ocr_texts: Vec<PathBuf>,
    pub ocr_summary: PathBuf,
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Folder(#[from] FolderError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Everything observed between launch and teardown.
struct Flight {
    marker_seen: bool,
    completion: CompletionOutcome,
}

pub struct ToolDriver {
    config: DriverConfig,
    launcher: Arc<dyn AppLauncher>,
    automation: Arc<dyn Automation>,
    probe: Arc<dyn CompletionProbe>,
    control: Arc<dyn ProcessControl>,
    postprocessor: PostProcessor,
    bus: Arc<EventBus>,
}

impl ToolDriver {
    /// Driver with injected seams; tests mock the outside world here.
    pub fn new(
        config: DriverConfig,
        launcher: Arc<dyn AppLauncher>,
        automation: Arc<dyn Automation>,
        probe: Arc<dyn CompletionProbe>,
        control: Arc<dyn ProcessControl>,
        extractor: Arc<dyn TextExtractor>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            launcher,
            automation,
            probe,
            control,
            postprocessor: PostProcessor::new(extractor),
            bus,
        }
    }

    /// Driver wired to the real OS: shell opener, osascript automation,
    /// process-table probing, and the tesseract gate.
    pub fn with_defaults(config: DriverConfig, bus: Arc<EventBus>) -> Self {
        let launcher = Arc::new(ShellLauncher::new(config.opener.clone()));
        let automation = Arc::new(ShellAutomation::new(config.automation_timeout));
        let probe = Arc::new(FolderProbe::new(config.process_name.clone()));
        let control = Arc::new(ShellProcessControl::new(
            config.process_name.clone(),
            config.quit_command.clone(),
        ));
        let extractor = Arc::new(TesseractExtractor::default());
        Self::new(config, launcher, automation, probe, control, extractor, bus)
    }

    /// Run one attempt end to end. Never returns an error: whatever
    /// happens mid-flight, the tool is torn down, the gate runs, and the
    /// outcome is folded into the report.
    pub async fn run(&self, ctx: &RunContext) -> AttemptReport {
        tracing::info!(
            run_id = ctx.run_id,
            task_id = %ctx.task_id,
            folder = %ctx.folder.display(),
            "Driving attempt"
        );
        let flight = self.fly(ctx).await;

        // Teardown is unconditional. The tool must not survive into the
        // next attempt, whether this one flew or crashed on the runway.
        self.control.terminate().await;
        let gate = self.postprocessor.process(ctx.run_id, &ctx.folder).await;

        self.conclude(ctx, flight, gate)
    }

    /// Launch through completion detection. Errors here mean the attempt
    /// never got the tool into a useful state.
    async fn fly(&self, ctx: &RunContext) -> Result<Flight, DriverError> {
        let app = self.open_tool(ctx).await?;

        tokio::time::sleep(self.config.startup_delay).await;
        self.bus.publish(
            RunEvent::new(
                RunEventType::TaskReady,
                ctx.run_id,
                status_name(lifecycle::STATUS_RUNNING),
                format!("{app} opened task {}", ctx.task_id),
            )
            .with_task_dir(ctx.folder.to_string_lossy())
            .with_artifact(&ctx.data_file),
        );

        let automation_ctx = AutomationContext {
            app,
            script_path: ctx.script_path(),
        };
        let winner = automation::run_strategies(
            self.automation.as_ref(),
            &self.config.strategies,
            &automation_ctx,
        )
        .await;
        if winner.is_none() {
            tracing::warn!(run_id = ctx.run_id, "No automation strategy confirmed execution");
        }

        let detector = CompletionDetector::new(self.config.completion.clone());
        let completion = detector
            .wait(ctx.run_id, &ctx.folder, self.probe.as_ref(), &self.bus)
            .await;

        Ok(Flight {
            marker_seen: winner.is_some(),
            completion,
        })
    }

    /// Walk the candidate list until the tool opens. Each candidate gets
    /// up to [`MAX_LAUNCH_ATTEMPTS`] tries when the error signature is
    /// transient; any other error moves straight to the next candidate,
    /// and no candidate is ever revisited.
    async fn open_tool(&self, ctx: &RunContext) -> Result<String, DriverError> {
        let candidates = launch::resolve_candidates(self.config.app_override.as_deref());
        let script_path = ctx.script_path();
        let mut failures: Vec<String> = Vec::new();

        for app in &candidates {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                // The folder can rot between retries; re-check before
                // every single open.
                taskfolder::verify(&ctx.folder, &ctx.data_file, &ctx.script_file).await?;
                match self.launcher.open(app, &script_path).await {
                    Ok(()) => {
                        tracing::info!(run_id = ctx.run_id, app = %app, attempt, "External tool opened");
                        return Ok(app.clone());
                    }
                    Err(e) => {
                        let message = e.to_string();
                        if launch::is_transient_launch_error(&message)
                            && attempt < MAX_LAUNCH_ATTEMPTS
                        {
                            tracing::warn!(
                                run_id = ctx.run_id,
                                app = %app,
                                attempt,
                                error = %message,
                                "Transient launch error, retrying"
                            );
                            tokio::time::sleep(self.config.launch_backoff).await;
                            continue;
                        }
                        tracing::warn!(
                            run_id = ctx.run_id,
                            app = %app,
                            attempt,
                            error = %message,
                            "Launch candidate failed"
                        );
                        failures.push(format!("{app}: {message}"));
                        break;
                    }
                }
            }
        }
        Err(LaunchError::Exhausted(failures.join("; ")).into())
    }

    /// Fold flight and gate into the final report. Completed means the
    /// automation marker was seen and at least one image survived the
    /// gate; anything else is a failure and gets the diagnostic card.
    fn conclude(
        &self,
        ctx: &RunContext,
        flight: Result<Flight, DriverError>,
        gate: OcrGateReport,
    ) -> AttemptReport {
        let mut images = gate.accepted;
        let (completed, message) = match flight {
            Ok(flight) => {
                let completed = flight.marker_seen && !images.is_empty();
                let mut message = flight.completion.message;
                if !flight.marker_seen {
                    message = format!("{message}; no automation strategy confirmed execution");
                } else if images.is_empty() {
                    message = format!("{message}; no accepted output image");
                }
                (completed, message)
            }
            Err(e) => (false, e.to_string()),
        };

        if completed {
            tracing::info!(run_id = ctx.run_id, images = images.len(), "Attempt completed");
        } else {
            tracing::warn!(run_id = ctx.run_id, message = %message, "Attempt failed");
            // A stale card from an earlier attempt on this folder is
            // superseded, not duplicated.
            images.retain(|p| {
                p.file_name()
                    .map(|n| n != FAILURE_IMAGE_NAME)
                    .unwrap_or(true)
            });
            images.push(failure::generate(&ctx.folder, &message));
        }

        AttemptReport {
            completed,
            message,
            images,
            ocr_texts: gate.ocr_texts,
            ocr_summary: gate.summary_path,
        }
    }
}
