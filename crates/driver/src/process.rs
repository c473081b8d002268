//! Process-table access for the external tool.
//!
//! The OS opener detaches, so there is never a child handle to wait on.
//! Liveness and CPU load come from sampling the process table; shutdown
//! goes through the tool's native quit command plus a force kill, in
//! that order, both unconditionally.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// Process name matched in the table, independent of install name.
pub const DEFAULT_PROCESS_NAME: &str = "StatLab";

/// Upper bound for any single process-control command.
pub const PROCESS_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between the native quit and the force kill, giving the tool a
/// moment to flush output files on its way down.
pub const QUIT_GRACE: Duration = Duration::from_millis(750);

/// Aggregate view of the tool's presence in the process table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolSample {
    /// Summed CPU percentage across all matching processes.
    pub cpu_percent: f64,
    /// Whether at least one matching process exists.
    pub running: bool,
}

impl ToolSample {
    pub const ABSENT: ToolSample = ToolSample {
        cpu_percent: 0.0,
        running: false,
    };
}

/// Names safe to interpolate into a `pkill -f` pattern. Same shape the
/// tool's installers use; anything else is refused rather than quoted.
pub fn is_safe_process_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '-' || c == '_' || c == '.')
}

/// Sample CPU and liveness for every process whose command name contains
/// `name` (case-insensitive). Failures degrade to [`ToolSample::ABSENT`]
/// with a warning; a missing sample must never sink an attempt.
pub async fn sample_tool(name: &str) -> ToolSample {
    let result = tokio::time::timeout(
        PROCESS_COMMAND_TIMEOUT,
        Command::new("ps")
            .args(["-axo", "pcpu=,comm="])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match result {
        Ok(Ok(output)) if output.status.success() => {
            parse_ps_output(&String::from_utf8_lossy(&output.stdout), name)
        }
        Ok(Ok(output)) => {
            tracing::warn!(status = ?output.status, "ps exited nonzero during tool sampling");
            ToolSample::ABSENT
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to run ps for tool sampling");
            ToolSample::ABSENT
        }
        Err(_) => {
            tracing::warn!("ps timed out during tool sampling");
            ToolSample::ABSENT
        }
    }
}

/// Parse `ps -axo pcpu=,comm=` output: one `<pcpu> <command>` pair per
/// line. Lines that do not parse are skipped.
pub fn parse_ps_output(output: &str, name: &str) -> ToolSample {
    let needle = name.to_lowercase();
    let mut cpu_percent = 0.0;
    let mut running = false;
    for line in output.lines() {
        let trimmed = line.trim();
        let Some((pcpu, command)) = trimmed.split_once(char::is_whitespace) else {
            continue;
        };
        if !command.trim().to_lowercase().contains(&needle) {
            continue;
        }
        let Ok(value) = pcpu.trim().parse::<f64>() else {
            continue;
        };
        running = true;
        cpu_percent += value;
    }
    ToolSample {
        cpu_percent,
        running,
    }
}

/// Terminates every instance of the tool. Implemented by
/// [`ShellProcessControl`] in production; tests substitute a recorder.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn terminate(&self);
}

/// Production control: native quit first so the tool can flush files,
/// then an unconditional force kill so no instance survives to poison
/// the next attempt. Both always run; failures are logged and absorbed.
pub struct ShellProcessControl {
    process_name: String,
    quit_command: Vec<String>,
}

impl ShellProcessControl {
    pub fn new(process_name: impl Into<String>, quit_command: Vec<String>) -> Self {
        Self {
            process_name: process_name.into(),
            quit_command,
        }
    }

    async fn run_quietly(&self, program: &str, args: &[String], what: &str) {
        let result = tokio::time::timeout(
            PROCESS_COMMAND_TIMEOUT,
            Command::new(program)
                .args(args)
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(what, "Process control command succeeded");
            }
            Ok(Ok(output)) => {
                // pkill exits 1 when nothing matched; that is the normal
                // case after a clean quit, not a failure worth noise.
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::debug!(what, status = ?output.status, stderr = %stderr.trim(), "Process control command exited nonzero");
            }
            Ok(Err(e)) => {
                tracing::warn!(what, error = %e, "Process control command failed to start");
            }
            Err(_) => {
                tracing::warn!(what, "Process control command timed out");
            }
        }
    }
}

#[async_trait]
impl ProcessControl for ShellProcessControl {
    async fn terminate(&self) {
        if let Some((program, args)) = self.quit_command.split_first() {
            self.run_quietly(program, args, "native quit").await;
            tokio::time::sleep(QUIT_GRACE).await;
        }

        if !is_safe_process_name(&self.process_name) {
            tracing::warn!(name = %self.process_name, "Refusing to pkill an unsafe process name");
            return;
        }
        self.run_quietly("pkill", &["-f".to_string(), self.process_name.clone()], "force kill")
            .await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
