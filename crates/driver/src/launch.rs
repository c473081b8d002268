//! Application launch: candidate names and open attempts.
//!
//! The tool's install name drifts across machines and versions, so a
//! launch works through an ordered candidate list rather than a single
//! configured name. Opening goes through the OS document opener; there
//! is no process handle to keep afterwards.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

/// Known install names, newest first. An explicit override from config
/// is tried before any of these.
pub const DEFAULT_APP_CANDIDATES: [&str; 3] = ["StatLab 2024", "StatLab 2023", "StatLab"];

/// Program used to hand a document to an application by name.
pub const DEFAULT_OPENER: &str = "open";

/// Total open attempts per candidate when the error looks transient.
pub const MAX_LAUNCH_ATTEMPTS: u32 = 3;

/// Fixed pause between transient-error retries.
pub const LAUNCH_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Opener error signature worth retrying. Right after login or an
/// install the OS application index can briefly report a present bundle
/// as missing; any other error means the candidate is genuinely wrong.
pub const TRANSIENT_ERROR_PATTERN: &str = r"(?i)file not found|no such file";

static TRANSIENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TRANSIENT_ERROR_PATTERN).expect("transient pattern must compile"));

/// Whether a launch error message matches the retryable signature.
pub fn is_transient_launch_error(message: &str) -> bool {
    TRANSIENT_RE.is_match(message)
}

/// Candidate list for one attempt: the override first when present,
/// then the fixed descending list. Duplicates of the override are
/// dropped so no name is ever tried twice.
pub fn resolve_candidates(override_name: Option<&str>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::with_capacity(DEFAULT_APP_CANDIDATES.len() + 1);
    if let Some(name) = override_name {
        let name = name.trim();
        if !name.is_empty() {
            candidates.push(name.to_string());
        }
    }
    for name in DEFAULT_APP_CANDIDATES {
        if candidates.iter().any(|c| c == name) {
            continue;
        }
        candidates.push(name.to_string());
    }
    candidates
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Failed to spawn opener '{opener}': {source}")]
    Spawn {
        opener: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Opener refused '{app}': {message}")]
    OpenFailed { app: String, message: String },

    #[error("All launch candidates failed: {0}")]
    Exhausted(String),
}

/// Something that can ask the OS to open a document with a named
/// application. Production uses [`ShellLauncher`]; tests substitute a
/// scripted fake.
#[async_trait]
pub trait AppLauncher: Send + Sync {
    async fn open(&self, app: &str, file: &Path) -> Result<(), LaunchError>;
}

/// Launcher shelling out to the configured opener program,
/// `open -a <app> <file>` by default.
pub struct ShellLauncher {
    opener: String,
}

impl ShellLauncher {
    pub fn new(opener: impl Into<String>) -> Self {
        Self {
            opener: opener.into(),
        }
    }
}

#[async_trait]
impl AppLauncher for ShellLauncher {
    async fn open(&self, app: &str, file: &Path) -> Result<(), LaunchError> {
        let output = Command::new(&self.opener)
            .arg("-a")
            .arg(app)
            .arg(file)
            .output()
            .await
            .map_err(|e| LaunchError::Spawn {
                opener: self.opener.clone(),
                source: e,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LaunchError::OpenFailed {
            app: app.to_string(),
            message: stderr.trim().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
