//! Script-execution automation.
//!
//! The tool has no scripting API, so execution is triggered through OS
//! UI automation helpers. Each strategy is plain data naming a helper
//! program and its arguments; the driver walks the list in priority
//! order and stops at the first output carrying the success marker. A
//! strategy that fails is logged and skipped, never fatal on its own.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Marker a helper prints once the tool confirmed execution started.
/// Helpers only reach their final `return` when every prior step ran
/// without error, so the marker doubles as an all-steps-succeeded flag.
pub const SUCCESS_MARKER: &str = "AUTOMATION_OK";

/// Placeholder in strategy args replaced with the analysis script path.
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// Placeholder replaced with the application name that was launched.
pub const APP_PLACEHOLDER: &str = "{app}";

/// Upper bound for one helper invocation. UI automation that has not
/// answered by then is wedged on a dialog and will never answer.
pub const DEFAULT_AUTOMATION_TIMEOUT: Duration = Duration::from_secs(20);

/// One way of telling the tool to run the current script. Configuration
/// data only; adding a strategy never means adding code.
#[derive(Debug, Clone)]
pub struct AutomationStrategy {
    /// Short name used in logs.
    pub name: String,
    /// Helper program to invoke.
    pub program: String,
    /// Arguments, with [`SCRIPT_PLACEHOLDER`] and [`APP_PLACEHOLDER`]
    /// substituted per attempt.
    pub args: Vec<String>,
}

/// Built-in strategies in priority order: cheapest and most reliable
/// first, fussier menu walks as fallbacks.
pub fn default_strategies() -> Vec<AutomationStrategy> {
    vec![
        AutomationStrategy {
            name: "keyboard-shortcut".into(),
            program: "osascript".into(),
            args: vec![
                "-e".into(),
                format!("tell application \"{}\" to activate", APP_PLACEHOLDER),
                "-e".into(),
                "tell application \"System Events\" to keystroke \"r\" using {command down}".into(),
                "-e".into(),
                format!("return \"{SUCCESS_MARKER}\""),
            ],
        },
        AutomationStrategy {
            name: "open-script-document".into(),
            program: "osascript".into(),
            args: vec![
                "-e".into(),
                format!(
                    "tell application \"{}\" to open POSIX file \"{}\"",
                    APP_PLACEHOLDER, SCRIPT_PLACEHOLDER
                ),
                "-e".into(),
                format!("return \"{SUCCESS_MARKER}\""),
            ],
        },
        AutomationStrategy {
            name: "menu-run-all".into(),
            program: "osascript".into(),
            args: vec![
                "-e".into(),
                format!(
                    "tell application \"System Events\" to tell process \"{}\" to \
                     click menu item \"Run All\" of menu \"Analyze\" of menu bar 1",
                    APP_PLACEHOLDER
                ),
                "-e".into(),
                format!("return \"{SUCCESS_MARKER}\""),
            ],
        },
        AutomationStrategy {
            name: "context-menu-run".into(),
            program: "osascript".into(),
            args: vec![
                "-e".into(),
                format!(
                    "tell application \"System Events\" to tell process \"{}\" to \
                     perform action \"AXShowMenu\" of window 1",
                    APP_PLACEHOLDER
                ),
                "-e".into(),
                format!(
                    "tell application \"System Events\" to tell process \"{}\" to \
                     click menu item \"Run All\" of menu 1 of window 1",
                    APP_PLACEHOLDER
                ),
                "-e".into(),
                format!("return \"{SUCCESS_MARKER}\""),
            ],
        },
    ]
}

/// Per-attempt substitution context.
#[derive(Debug, Clone)]
pub struct AutomationContext {
    /// Application name that actually opened.
    pub app: String,
    /// Absolute path of the prepared analysis script.
    pub script_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Automation helper '{program}' failed to start: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Automation strategy '{name}' timed out")]
    TimedOut { name: String },
}

/// Executes one strategy and hands back whatever it printed. Production
/// shells out; tests substitute a scripted fake.
#[async_trait]
pub trait Automation: Send + Sync {
    async fn attempt(
        &self,
        strategy: &AutomationStrategy,
        ctx: &AutomationContext,
    ) -> Result<String, AutomationError>;
}

/// Production automation: runs the helper with substituted args under a
/// timeout and returns combined stdout and stderr.
pub struct ShellAutomation {
    timeout: Duration,
}

impl ShellAutomation {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ShellAutomation {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOMATION_TIMEOUT)
    }
}

#[async_trait]
impl Automation for ShellAutomation {
    async fn attempt(
        &self,
        strategy: &AutomationStrategy,
        ctx: &AutomationContext,
    ) -> Result<String, AutomationError> {
        let args: Vec<String> = strategy
            .args
            .iter()
            .map(|arg| substitute(arg, ctx))
            .collect();

        let result = tokio::time::timeout(
            self.timeout,
            Command::new(&strategy.program)
                .args(&args)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(stderr.trim());
                }
                Ok(text)
            }
            Ok(Err(e)) => Err(AutomationError::Spawn {
                program: strategy.program.clone(),
                source: e,
            }),
            Err(_) => Err(AutomationError::TimedOut {
                name: strategy.name.clone(),
            }),
        }
    }
}

/// Substitute both placeholders in one argument template.
pub fn substitute(template: &str, ctx: &AutomationContext) -> String {
    template
        .replace(SCRIPT_PLACEHOLDER, &ctx.script_path.to_string_lossy())
        .replace(APP_PLACEHOLDER, &ctx.app)
}

/// Walk strategies until one prints the success marker. Returns the
/// winning strategy's name, or `None` when every strategy failed or
/// stayed silent. Individual failures are logged and absorbed.
pub async fn run_strategies(
    automation: &dyn Automation,
    strategies: &[AutomationStrategy],
    ctx: &AutomationContext,
) -> Option<String> {
    for strategy in strategies {
        match automation.attempt(strategy, ctx).await {
            Ok(output) if output.contains(SUCCESS_MARKER) => {
                tracing::info!(strategy = %strategy.name, "Automation confirmed execution");
                return Some(strategy.name.clone());
            }
            Ok(output) => {
                tracing::warn!(
                    strategy = %strategy.name,
                    output = %output.trim(),
                    "No success marker in automation output"
                );
            }
            Err(e) => {
                tracing::warn!(strategy = %strategy.name, error = %e, "Automation strategy failed");
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
