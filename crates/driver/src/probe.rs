//! Evidence probing for completion detection.
//!
//! The tool never announces completion, so detection works from two
//! observable side effects: image files appearing in the task folder and
//! the tool's CPU load in the process table. One probe call bundles both
//! into a single sample.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use statrig_core::artifacts;

use crate::process;

/// One poll of the evidence for a running attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSample {
    /// Image files currently visible in the task folder.
    pub artifact_count: usize,
    /// Summed CPU percentage of the tool's processes.
    pub cpu_percent: f64,
    /// Whether any tool process exists.
    pub tool_running: bool,
}

/// Source of [`ProbeSample`]s. Production reads the filesystem and the
/// process table; tests feed scripted samples.
#[async_trait]
pub trait CompletionProbe: Send + Sync {
    async fn poll(&self, folder: &Path) -> ProbeSample;
}

/// Production probe over a task folder and the process table.
pub struct FolderProbe {
    process_name: String,
}

impl FolderProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }
}

#[async_trait]
impl CompletionProbe for FolderProbe {
    async fn poll(&self, folder: &Path) -> ProbeSample {
        let artifact_count = list_images(folder).await.len();
        let sample = process::sample_tool(&self.process_name).await;
        ProbeSample {
            artifact_count,
            cpu_percent: sample.cpu_percent,
            tool_running: sample.running,
        }
    }
}

/// Image files directly inside `folder`, sorted by name for stable
/// counting and registration order. There is no manifest; the extension
/// glob is the contract, which is also why renaming a rejected file is
/// enough to drop it from this set. Read errors degrade to an empty
/// list.
pub async fn list_images(folder: &Path) -> Vec<PathBuf> {
    let mut images = Vec::new();
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(folder = %folder.display(), error = %e, "Cannot list task folder");
            return images;
        }
    };
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| t.is_file())
                    .unwrap_or(false);
                if !is_file {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if artifacts::is_image_file(&name) {
                    images.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "Task folder listing aborted");
                break;
            }
        }
    }
    images.sort();
    images
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
