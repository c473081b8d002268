//! Task folder verification and preparation.
//!
//! A task folder is the unit of exchange with the external tool: one
//! folder per attempt, holding the input data file and the analysis
//! script, and later whatever output images the tool writes next to
//! them. Verification is cheap and re-runs before every launch attempt,
//! because the folder can rot between checks (network mounts, cleanup
//! jobs, the tool itself).

use std::io;
use std::path::{Path, PathBuf};

use statrig_core::script;
use statrig_core::types::DbId;
use thiserror::Error;
use uuid::Uuid;

/// Why a task folder was refused. Checks run in a fixed order and the
/// first failure wins, so the variant always names the actual problem.
#[derive(Debug, Error)]
pub enum FolderError {
    #[error("Task folder does not exist: {0}")]
    Missing(PathBuf),

    #[error("Task folder is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Task folder is not writable: {folder}: {source}")]
    NotWritable {
        folder: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Data file missing from task folder: {0}")]
    DataFileMissing(PathBuf),

    #[error("Script file missing from task folder: {0}")]
    ScriptFileMissing(PathBuf),

    #[error("Input file resolves outside the task folder: {0}")]
    EscapesFolder(PathBuf),

    #[error("Task folder check failed: {0}")]
    Io(#[from] io::Error),
}

/// Verify a task folder is fit for a launch attempt.
///
/// Order of checks: folder exists, folder is a directory, folder is
/// writable (probe file), data file present, script file present, and
/// both input files resolve inside the folder after following symlinks.
pub async fn verify(folder: &Path, data_file: &str, script_file: &str) -> Result<(), FolderError> {
    let meta = match tokio::fs::metadata(folder).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FolderError::Missing(folder.to_path_buf()));
        }
        Err(e) => return Err(FolderError::Io(e)),
    };
    if !meta.is_dir() {
        return Err(FolderError::NotADirectory(folder.to_path_buf()));
    }

    // The tool writes its output next to the inputs, so a read-only
    // folder guarantees a wasted launch. Probe with a throwaway file.
    let probe = folder.join(format!(".statrig-probe-{}", Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&probe, b"probe").await {
        return Err(FolderError::NotWritable {
            folder: folder.to_path_buf(),
            source: e,
        });
    }
    let _ = tokio::fs::remove_file(&probe).await;

    let data_path = folder.join(data_file);
    if !file_exists(&data_path).await? {
        return Err(FolderError::DataFileMissing(data_path));
    }
    let script_path = folder.join(script_file);
    if !file_exists(&script_path).await? {
        return Err(FolderError::ScriptFileMissing(script_path));
    }

    ensure_within(folder, &data_path).await?;
    ensure_within(folder, &script_path).await?;
    Ok(())
}

async fn file_exists(path: &Path) -> Result<bool, io::Error> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Reject inputs that escape the folder once symlinks are resolved. A
/// link inside the folder pointing at `/etc/passwd` would otherwise pass
/// the existence checks and hand the tool a file we never vetted.
async fn ensure_within(folder: &Path, file: &Path) -> Result<(), FolderError> {
    let folder_real = tokio::fs::canonicalize(folder).await?;
    let file_real = tokio::fs::canonicalize(file).await?;
    if file_real.starts_with(&folder_real) {
        Ok(())
    } else {
        Err(FolderError::EscapesFolder(file.to_path_buf()))
    }
}

/// Make sure the script opens the task's data file as its first act.
///
/// Rewrites the script in place when the managed header is missing or
/// stale. Returns whether the file changed. Safe to call repeatedly;
/// re-preparing an already prepared script is a no-op.
pub async fn ensure_open_data_header(
    folder: &Path,
    data_file: &str,
    script_file: &str,
    run_id: DbId,
) -> Result<bool, io::Error> {
    let script_path = folder.join(script_file);
    let original = tokio::fs::read_to_string(&script_path).await?;
    let data_path = folder.join(data_file);
    let prepared = script::inject_open_data_header(&original, &data_path.to_string_lossy(), run_id);
    if prepared == original {
        return Ok(false);
    }
    tokio::fs::write(&script_path, prepared).await?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
