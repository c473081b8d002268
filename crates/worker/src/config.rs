//! Worker configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use statrig_core::completion::CompletionConfig;
use statrig_driver::launch::DEFAULT_OPENER;
use statrig_driver::process::DEFAULT_PROCESS_NAME;
use statrig_driver::DriverConfig;

/// Worker configuration.
///
/// All fields except `database_url` have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Postgres connection string.
    pub database_url: String,
    /// Root directory holding one task folder per external task id.
    pub task_root: PathBuf,
    /// Explicit application name tried before the built-in candidates.
    pub app_override: Option<String>,
    /// Opener program handing documents to applications.
    pub opener: String,
    /// Process name for sampling and termination.
    pub process_name: String,
    /// Pause between opening the tool and starting automation, seconds.
    pub startup_delay_secs: u64,
    /// Intake poll interval, seconds.
    pub intake_poll_secs: u64,
    /// Queue-mode settle delay before each dispatch, seconds.
    pub settle_delay_secs: u64,
    /// Completion wait ceiling used when no runtime override is set,
    /// seconds.
    pub max_wait_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default              |
    /// |------------------------------|----------------------|
    /// | `DATABASE_URL`               | (required)           |
    /// | `STATRIG_TASK_ROOT`          | `/var/statrig/tasks` |
    /// | `STATRIG_APP_OVERRIDE`       | (unset)              |
    /// | `STATRIG_OPENER`             | `open`               |
    /// | `STATRIG_PROCESS_NAME`       | `StatLab`            |
    /// | `STATRIG_STARTUP_DELAY_SECS` | `8`                  |
    /// | `STATRIG_INTAKE_POLL_SECS`   | `2`                  |
    /// | `STATRIG_SETTLE_DELAY_SECS`  | `3`                  |
    /// | `STATRIG_MAX_WAIT_SECS`      | `600`                |
    pub fn from_env() -> Self {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for the worker");

        let task_root = std::env::var("STATRIG_TASK_ROOT")
            .unwrap_or_else(|_| "/var/statrig/tasks".into())
            .into();

        let app_override = std::env::var("STATRIG_APP_OVERRIDE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let opener = std::env::var("STATRIG_OPENER").unwrap_or_else(|_| DEFAULT_OPENER.into());

        let process_name =
            std::env::var("STATRIG_PROCESS_NAME").unwrap_or_else(|_| DEFAULT_PROCESS_NAME.into());

        let startup_delay_secs: u64 = std::env::var("STATRIG_STARTUP_DELAY_SECS")
            .unwrap_or_else(|_| "8".into())
            .parse()
            .expect("STATRIG_STARTUP_DELAY_SECS must be a valid u64");

        let intake_poll_secs: u64 = std::env::var("STATRIG_INTAKE_POLL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("STATRIG_INTAKE_POLL_SECS must be a valid u64");

        let settle_delay_secs: u64 = std::env::var("STATRIG_SETTLE_DELAY_SECS")
            .unwrap_or_else(|_| "3".into())
            .parse()
            .expect("STATRIG_SETTLE_DELAY_SECS must be a valid u64");

        let max_wait_secs: u64 = std::env::var("STATRIG_MAX_WAIT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("STATRIG_MAX_WAIT_SECS must be a valid u64");

        Self {
            database_url,
            task_root,
            app_override,
            opener,
            process_name,
            startup_delay_secs,
            intake_poll_secs,
            settle_delay_secs,
            max_wait_secs,
        }
    }

    /// Driver configuration derived from the worker's environment. The
    /// completion ceiling here is the fallback; a live override from the
    /// settings table replaces it per attempt.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            app_override: self.app_override.clone(),
            opener: self.opener.clone(),
            process_name: self.process_name.clone(),
            quit_command: vec![
                "osascript".into(),
                "-e".into(),
                format!("quit app \"{}\"", self.process_name),
            ],
            startup_delay: Duration::from_secs(self.startup_delay_secs),
            completion: CompletionConfig::for_max_wait(Duration::from_secs(self.max_wait_secs)),
            ..DriverConfig::default()
        }
    }
}
