//! End-to-end driver tests over a fake outside world.
//!
//! Every seam the driver talks through (opener, automation helpers,
//! evidence probe, process control, OCR) is substituted with a scripted
//! fake, so these tests pin down the driver's decisions: when it
//! launches, what it retries, when it gives up, and what the final
//! report contains. The task folders are real temp directories.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use statrig_core::artifacts::{
    DATA_FILE_NAME, FAILURE_IMAGE_NAME, GATED_FINAL_FILE, GATED_INITIAL_FILE, OcrSummary,
    REJECTED_SUFFIX, SCRIPT_FILE_NAME,
};
use statrig_core::completion::CompletionConfig;
use statrig_driver::automation::{Automation, AutomationContext, AutomationError, AutomationStrategy, SUCCESS_MARKER};
use statrig_driver::launch::{AppLauncher, LaunchError};
use statrig_driver::ocr::{OcrError, OcrReading, TextExtractor};
use statrig_driver::probe::{CompletionProbe, ProbeSample};
use statrig_driver::process::ProcessControl;
use statrig_driver::{AttemptReport, DriverConfig, RunContext, ToolDriver};
use statrig_events::{EventBus, RunEventType};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Opener replaying canned results; records every (app, attempt) call.
struct ScriptedLauncher {
    // One entry per expected call: Ok opens, Err(message) refuses.
    results: Mutex<Vec<Result<(), String>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLauncher {
    fn new(results: Vec<Result<(), String>>) -> Self {
        Self {
            results: Mutex::new(results),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AppLauncher for ScriptedLauncher {
    async fn open(&self, app: &str, _file: &Path) -> Result<(), LaunchError> {
        self.calls.lock().unwrap().push(app.to_string());
        let mut results = self.results.lock().unwrap();
        if results.is_empty() {
            return Ok(());
        }
        results.remove(0).map_err(|message| LaunchError::OpenFailed {
            app: app.to_string(),
            message,
        })
    }
}

/// Opener that sabotages the folder: deletes the script, then reports a
/// transient error so the driver will want to retry.
struct SabotageLauncher {
    script: PathBuf,
    calls: AtomicU32,
}

#[async_trait]
impl AppLauncher for SabotageLauncher {
    async fn open(&self, app: &str, _file: &Path) -> Result<(), LaunchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::fs::remove_file(&self.script).unwrap();
        Err(LaunchError::OpenFailed {
            app: app.to_string(),
            message: "File not found".into(),
        })
    }
}

/// Automation that either confirms immediately or stays silent.
struct CannedAutomation {
    confirm: bool,
    calls: AtomicU32,
}

impl CannedAutomation {
    fn confirming() -> Self {
        Self {
            confirm: true,
            calls: AtomicU32::new(0),
        }
    }

    fn silent() -> Self {
        Self {
            confirm: false,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Automation for CannedAutomation {
    async fn attempt(
        &self,
        _strategy: &AutomationStrategy,
        _ctx: &AutomationContext,
    ) -> Result<String, AutomationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.confirm {
            Ok(SUCCESS_MARKER.to_string())
        } else {
            Ok(String::new())
        }
    }
}

/// Probe replaying a fixed sample sequence, repeating the last entry.
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

/// Records terminations instead of touching the process table.
#[derive(Default)]
struct RecordingControl {
    terminations: AtomicU32,
}

#[async_trait]
impl ProcessControl for RecordingControl {
    async fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

/// OCR fake: listed file names fail the legibility check.
struct GateFake {
    failing: Vec<&'static str>,
}

#[async_trait]
impl TextExtractor for GateFake {
    async fn extract(&self, image: &Path) -> Result<OcrReading, OcrError> {
        let name = image.file_name().unwrap().to_string_lossy().to_string();
        if self.failing.contains(&name.as_str()) {
            Ok(OcrReading {
                success: false,
                confidence: 5.0,
                text: String::new(),
            })
        } else {
            Ok(OcrReading {
                success: true,
                confidence: 90.0,
                text: "Model Summary".into(),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    launcher: Arc<ScriptedLauncher>,
    automation: Arc<CannedAutomation>,
    control: Arc<RecordingControl>,
    bus: Arc<EventBus>,
    driver: ToolDriver,
}

fn fast_config() -> DriverConfig {
    DriverConfig {
        startup_delay: Duration::from_millis(100),
        launch_backoff: Duration::from_millis(100),
        // The floor is not a poll multiple, so no poll lands exactly on it.
        completion: CompletionConfig {
            poll_interval: Duration::from_millis(500),
            min_runtime: Duration::from_millis(1250),
            max_wait: Duration::from_secs(5),
            cpu_idle_pct: 5.0,
            stable_polls_required: 2,
        },
        ..DriverConfig::default()
    }
}

fn harness(
    launcher: ScriptedLauncher,
    automation: CannedAutomation,
    probe: ScriptedProbe,
    failing_ocr: Vec<&'static str>,
) -> Harness {
    let launcher = Arc::new(launcher);
    let automation = Arc::new(automation);
    let control = Arc::new(RecordingControl::default());
    let bus = Arc::new(EventBus::default());
    let driver = ToolDriver::new(
        fast_config(),
        launcher.clone(),
        automation.clone(),
        Arc::new(probe),
        control.clone(),
        Arc::new(GateFake {
            failing: failing_ocr,
        }),
        bus.clone(),
    );
    Harness {
        launcher,
        automation,
        control,
        bus,
        driver,
    }
}

async fn prepared_folder(extra_images: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join(DATA_FILE_NAME), "x,y\n1,2\n")
        .await
        .unwrap();
    tokio::fs::write(dir.path().join(SCRIPT_FILE_NAME), "SCATTERPLOT X=x Y=y.\n")
        .await
        .unwrap();
    for name in extra_images {
        tokio::fs::write(dir.path().join(name), b"png-ish")
            .await
            .unwrap();
    }
    dir
}

fn ctx_for(dir: &TempDir, run_id: i64) -> RunContext {
    RunContext {
        run_id,
        task_id: format!("task-{run_id}"),
        folder: dir.path().to_path_buf(),
        data_file: DATA_FILE_NAME.into(),
        script_file: SCRIPT_FILE_NAME.into(),
    }
}

fn image_names(report: &AttemptReport) -> Vec<String> {
    report
        .images
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect()
}

fn busy(count: usize) -> ProbeSample {
    ProbeSample {
        artifact_count: count,
        cpu_percent: 80.0,
        tool_running: true,
    }
}

fn idle(count: usize) -> ProbeSample {
    ProbeSample {
        artifact_count: count,
        cpu_percent: 1.0,
        tool_running: true,
    }
}

// ---------------------------------------------------------------------------
// Test: verification gates the launch
// ---------------------------------------------------------------------------

/// A folder missing its script file fails the attempt before any open
/// is tried; teardown and the gate still run, and the report carries
/// exactly one failure card.
#[tokio::test(start_paused = true)]
async fn missing_script_blocks_launch_entirely() {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join(DATA_FILE_NAME), "x\n1\n")
        .await
        .unwrap();

    let h = harness(
        ScriptedLauncher::new(vec![]),
        CannedAutomation::confirming(),
        ScriptedProbe::new(vec![idle(0)]),
        vec![],
    );
    let report = h.driver.run(&ctx_for(&dir, 1)).await;

    assert!(!report.completed);
    assert!(report.message.contains("Script file missing"));
    assert!(report.message.contains(SCRIPT_FILE_NAME));
    assert!(h.launcher.calls().is_empty(), "no open attempt may happen");
    assert_eq!(h.automation.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.control.terminations.load(Ordering::SeqCst), 1);

    assert_eq!(image_names(&report), vec![FAILURE_IMAGE_NAME]);
    assert!(report.images[0].is_file());
    assert!(report.ocr_summary.is_file());
}

/// The folder is re-verified before every open attempt, not just once:
/// when the script vanishes between retries, the next verification
/// catches it and the candidate walk stops.
#[tokio::test(start_paused = true)]
async fn folder_rot_between_retries_is_caught() {
    let dir = prepared_folder(&[]).await;
    let launcher = Arc::new(SabotageLauncher {
        script: dir.path().join(SCRIPT_FILE_NAME),
        calls: AtomicU32::new(0),
    });
    let control = Arc::new(RecordingControl::default());
    let bus = Arc::new(EventBus::default());
    let driver = ToolDriver::new(
        fast_config(),
        launcher.clone(),
        Arc::new(CannedAutomation::confirming()),
        Arc::new(ScriptedProbe::new(vec![idle(0)])),
        control.clone(),
        Arc::new(GateFake { failing: vec![] }),
        bus,
    );

    let report = driver.run(&ctx_for(&dir, 2)).await;

    assert!(!report.completed);
    assert!(report.message.contains("Script file missing"));
    // First open sabotaged the folder and failed transiently; the retry
    // never opened because verification failed first.
    assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(control.terminations.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: candidate walk
// ---------------------------------------------------------------------------

/// Non-transient errors move straight down the candidate list, each name
/// tried exactly once, and the aggregate failure names every candidate.
#[tokio::test(start_paused = true)]
async fn failed_candidates_are_never_revisited() {
    let dir = prepared_folder(&[]).await;
    let h = harness(
        ScriptedLauncher::new(vec![
            Err("application is damaged".into()),
            Err("permission denied".into()),
            Err("application is damaged".into()),
        ]),
        CannedAutomation::confirming(),
        ScriptedProbe::new(vec![idle(0)]),
        vec![],
    );

    let report = h.driver.run(&ctx_for(&dir, 3)).await;

    assert!(!report.completed);
    assert_eq!(
        h.launcher.calls(),
        vec!["StatLab 2024", "StatLab 2023", "StatLab"]
    );
    assert!(report.message.contains("All launch candidates failed"));
    assert!(report.message.contains("StatLab 2024"));
    assert!(report.message.contains("permission denied"));
    assert_eq!(h.automation.calls.load(Ordering::SeqCst), 0);
    assert_eq!(image_names(&report), vec![FAILURE_IMAGE_NAME]);
}

/// The retryable signature gets its fixed retries on one candidate, and
/// a success on the final try proceeds to a completed attempt.
#[tokio::test(start_paused = true)]
async fn transient_open_errors_are_retried_then_succeed() {
    let dir = prepared_folder(&["chart_01.png", "chart_02.png"]).await;
    let mut config = fast_config();
    config.app_override = Some("StatLab Test".into());

    let launcher = Arc::new(ScriptedLauncher::new(vec![
        Err("File not found".into()),
        Err("no such file".into()),
        Ok(()),
    ]));
    let control = Arc::new(RecordingControl::default());
    let bus = Arc::new(EventBus::default());
    let driver = ToolDriver::new(
        config,
        launcher.clone(),
        Arc::new(CannedAutomation::confirming()),
        Arc::new(ScriptedProbe::new(vec![idle(2)])),
        control.clone(),
        Arc::new(GateFake { failing: vec![] }),
        bus,
    );

    let report = driver.run(&ctx_for(&dir, 4)).await;

    assert!(report.completed, "message: {}", report.message);
    assert_eq!(
        launcher.calls(),
        vec!["StatLab Test", "StatLab Test", "StatLab Test"]
    );
    assert_eq!(report.images.len(), 2);
    assert!(report.message.contains("idle"));
    assert_eq!(control.terminations.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: completion and teardown
// ---------------------------------------------------------------------------

/// A tool that opens and dies without writing anything fails early with
/// the exit named in the message; the folder gets exactly one card.
#[tokio::test(start_paused = true)]
async fn early_tool_exit_fails_fast_with_one_card() {
    let dir = prepared_folder(&[]).await;
    let gone = ProbeSample {
        artifact_count: 0,
        cpu_percent: 0.0,
        tool_running: false,
    };
    let h = harness(
        ScriptedLauncher::new(vec![Ok(())]),
        CannedAutomation::confirming(),
        ScriptedProbe::new(vec![gone]),
        vec![],
    );

    let report = h.driver.run(&ctx_for(&dir, 5)).await;

    assert!(!report.completed);
    assert!(report.message.contains("exited without producing output"));
    assert_eq!(image_names(&report), vec![FAILURE_IMAGE_NAME]);
    assert!(dir.path().join(FAILURE_IMAGE_NAME).is_file());
    assert_eq!(h.control.terminations.load(Ordering::SeqCst), 1);

    // The card is a real, decodable image.
    let decoded = image::open(dir.path().join(FAILURE_IMAGE_NAME)).unwrap();
    assert_eq!(decoded.to_rgb8().dimensions(), (800, 600));
}

/// Confirmed execution with output but no marker requirement violated:
/// silence from every automation strategy fails the attempt even when
/// the tool produced plausible output.
#[tokio::test(start_paused = true)]
async fn silent_automation_fails_the_attempt() {
    let dir = prepared_folder(&["chart_01.png"]).await;
    let h = harness(
        ScriptedLauncher::new(vec![Ok(())]),
        CannedAutomation::silent(),
        ScriptedProbe::new(vec![idle(1)]),
        vec![],
    );

    let report = h.driver.run(&ctx_for(&dir, 6)).await;

    assert!(!report.completed);
    assert!(report
        .message
        .contains("no automation strategy confirmed execution"));
    let names = image_names(&report);
    assert!(names.contains(&"chart_01.png".to_string()));
    assert_eq!(
        names.iter().filter(|n| *n == FAILURE_IMAGE_NAME).count(),
        1
    );
}

// ---------------------------------------------------------------------------
// Test: the OCR gate shapes the outcome
// ---------------------------------------------------------------------------

/// A failed check on the final designated file strips that file alone;
/// the attempt still completes on the surviving images and the summary
/// records the split verdict.
#[tokio::test(start_paused = true)]
async fn gate_rejection_strips_one_file_without_failing_the_run() {
    let dir = prepared_folder(&[GATED_INITIAL_FILE, GATED_FINAL_FILE, "chart_03.png"]).await;
    let h = harness(
        ScriptedLauncher::new(vec![Ok(())]),
        CannedAutomation::confirming(),
        ScriptedProbe::new(vec![idle(3)]),
        vec![GATED_FINAL_FILE],
    );

    let report = h.driver.run(&ctx_for(&dir, 7)).await;

    assert!(report.completed, "message: {}", report.message);
    let names = image_names(&report);
    assert_eq!(names, vec!["chart_03.png", GATED_INITIAL_FILE]);
    assert!(dir
        .path()
        .join(format!("{GATED_FINAL_FILE}{REJECTED_SUFFIX}"))
        .is_file());
    assert!(!dir.path().join(FAILURE_IMAGE_NAME).exists());

    let raw = tokio::fs::read_to_string(&report.ocr_summary).await.unwrap();
    let summary: OcrSummary = serde_json::from_str(&raw).unwrap();
    assert!(summary.initial_success);
    assert!(!summary.final_success);
}

/// When the gate rejects every image the attempt flips to failed even
/// though detection looked healthy.
#[tokio::test(start_paused = true)]
async fn losing_every_image_to_the_gate_fails_the_attempt() {
    let dir = prepared_folder(&[GATED_INITIAL_FILE]).await;
    let h = harness(
        ScriptedLauncher::new(vec![Ok(())]),
        CannedAutomation::confirming(),
        ScriptedProbe::new(vec![idle(1)]),
        vec![GATED_INITIAL_FILE],
    );

    let report = h.driver.run(&ctx_for(&dir, 8)).await;

    assert!(!report.completed);
    assert!(report.message.contains("no accepted output image"));
    assert_eq!(image_names(&report), vec![FAILURE_IMAGE_NAME]);
}

// ---------------------------------------------------------------------------
// Test: events
// ---------------------------------------------------------------------------

/// A healthy attempt announces readiness once the tool is open and
/// reports each artifact-count change while it watches.
#[tokio::test(start_paused = true)]
async fn ready_and_progress_events_are_published() {
    let dir = prepared_folder(&["chart_01.png", "chart_02.png"]).await;
    let h = harness(
        ScriptedLauncher::new(vec![Ok(())]),
        CannedAutomation::confirming(),
        ScriptedProbe::new(vec![busy(0), idle(2)]),
        vec![],
    );
    let mut rx = h.bus.subscribe();

    let report = h.driver.run(&ctx_for(&dir, 9)).await;
    assert!(report.completed, "message: {}", report.message);

    let ready = rx.try_recv().unwrap();
    assert_eq!(ready.event_type, RunEventType::TaskReady);
    assert_eq!(ready.run_id, 9);
    assert_eq!(ready.artifact.as_deref(), Some(DATA_FILE_NAME));
    assert!(ready.task_dir.is_some());

    let progress = rx.try_recv().unwrap();
    assert_eq!(progress.event_type, RunEventType::RunProgress);
    assert_eq!(progress.image_count, Some(2));
}
