//! Artifact kinds and task-folder naming conventions.
//!
//! Generated images are discovered by extension glob inside the task
//! folder, never via a manifest, so the conventions here are the contract
//! between the driver (which writes and renames files) and the worker
//! (which registers them durably).

use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Artifact kinds
// ---------------------------------------------------------------------------

/// Values accepted by `artifacts.kind` (mirrored by a CHECK constraint).
pub const KIND_INPUT_DATA: &str = "input_data";
pub const KIND_INPUT_SCRIPT: &str = "input_script";
pub const KIND_OUTPUT_IMAGE: &str = "output_image";
pub const KIND_OCR_TEXT: &str = "ocr_text";
pub const KIND_OCR_SUMMARY: &str = "ocr_summary";

// ---------------------------------------------------------------------------
// Task folder conventions
// ---------------------------------------------------------------------------

/// Conventional name of the copied input data file.
pub const DATA_FILE_NAME: &str = "data.csv";

/// Conventional name of the analysis script.
pub const SCRIPT_FILE_NAME: &str = "analysis.sts";

/// Extensions the output-image glob accepts (lowercase).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// The two OCR-gated output files, matched by exact name.
pub const GATED_INITIAL_FILE: &str = "results_initial.png";
pub const GATED_FINAL_FILE: &str = "results_final.png";

/// Conventional name of the synthetic failure-diagnostic image.
pub const FAILURE_IMAGE_NAME: &str = "run_failure.png";

/// Suffix appended to a gated file that failed its OCR check. The rename
/// removes the file from the image glob without destroying evidence.
pub const REJECTED_SUFFIX: &str = ".rejected";

/// File name of the OCR gate summary written into the task folder.
pub const OCR_SUMMARY_FILE_NAME: &str = "ocr_summary.json";

/// True when `name` has one of the accepted image extensions.
pub fn is_image_file(name: &str) -> bool {
    let ext = match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return false,
    };
    IMAGE_EXTENSIONS.contains(&ext.as_str())
}

/// MIME type for a registered artifact, from its file name.
pub fn mime_type_for(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// OCR gate summary
// ---------------------------------------------------------------------------

/// Structured result of the OCR gate over the two designated output files.
///
/// Always recorded and persisted as its own artifact, independent of
/// whether the run itself succeeded. Field names are the wire format of
/// the persisted JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSummary {
    pub initial_success: bool,
    pub final_success: bool,
    pub initial_confidence: f64,
    pub final_confidence: f64,
    pub initial_text_length: usize,
    pub final_text_length: usize,
}

impl Default for OcrSummary {
    fn default() -> Self {
        Self {
            initial_success: false,
            final_success: false,
            initial_confidence: 0.0,
            final_confidence: 0.0,
            initial_text_length: 0,
            final_text_length: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
