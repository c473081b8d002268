//! OCR gate over the tool's designated output files.
//!
//! The tool will happily render a blank or clipped canvas and exit as if
//! all were well, so the two designated result views must prove they
//! carry legible text before anyone downstream sees them. Failing a
//! check does not delete the file; it is renamed out of the extension
//! glob, which keeps it on disk for diagnosis while dropping it from
//! counting, registration, and events in one move.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use statrig_core::artifacts::{
    OcrSummary, GATED_FINAL_FILE, GATED_INITIAL_FILE, OCR_SUMMARY_FILE_NAME, REJECTED_SUFFIX,
};
use statrig_core::types::DbId;

use crate::ocr::{OcrError, OcrReading, TextExtractor};
use crate::probe;

/// What the gate did to one task folder.
#[derive(Debug)]
pub struct OcrGateReport {
    /// Gate results, also persisted as the summary document.
    pub summary: OcrSummary,
    /// Image files still visible after the gate, sorted by name.
    pub accepted: Vec<PathBuf>,
    /// Extracted-text sidecar files written for passing checks.
    pub ocr_texts: Vec<PathBuf>,
    /// The summary document; written on every invocation.
    pub summary_path: PathBuf,
}

pub struct PostProcessor {
    extractor: Arc<dyn TextExtractor>,
}

impl PostProcessor {
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Self {
        Self { extractor }
    }

    /// Run the gate over a finished attempt's folder. Never fails: OCR
    /// problems count as failed readings for the file in question, and
    /// filesystem problems are logged and absorbed.
    pub async fn process(&self, run_id: DbId, folder: &Path) -> OcrGateReport {
        let mut summary = OcrSummary::default();
        let mut ocr_texts = Vec::new();

        let initial = self
            .gate_file(run_id, folder, GATED_INITIAL_FILE, &mut ocr_texts)
            .await;
        summary.initial_success = initial.success;
        summary.initial_confidence = initial.confidence;
        summary.initial_text_length = initial.text.chars().count();

        let final_ = self
            .gate_file(run_id, folder, GATED_FINAL_FILE, &mut ocr_texts)
            .await;
        summary.final_success = final_.success;
        summary.final_confidence = final_.confidence;
        summary.final_text_length = final_.text.chars().count();

        let summary_path = folder.join(OCR_SUMMARY_FILE_NAME);
        match serde_json::to_vec_pretty(&summary) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(&summary_path, bytes).await {
                    tracing::error!(run_id, path = %summary_path.display(), error = %e, "Could not write OCR summary");
                }
            }
            Err(e) => {
                tracing::error!(run_id, error = %e, "Could not serialize OCR summary");
            }
        }

        let accepted = probe::list_images(folder).await;
        OcrGateReport {
            summary,
            accepted,
            ocr_texts,
            summary_path,
        }
    }

    /// Gate one designated file: extract, and either write the text
    /// sidecar or rename the file out of the visible set. A missing file
    /// reads as a failed check with nothing to rename.
    async fn gate_file(
        &self,
        run_id: DbId,
        folder: &Path,
        file_name: &str,
        ocr_texts: &mut Vec<PathBuf>,
    ) -> OcrReading {
        let path = folder.join(file_name);
        let present = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !present {
            tracing::warn!(run_id, file = file_name, "Designated output file never appeared");
            return OcrReading {
                success: false,
                confidence: 0.0,
                text: String::new(),
            };
        }

        let reading = match self.extractor.extract(&path).await {
            Ok(reading) => reading,
            Err(e @ OcrError::BinaryMissing(_)) => {
                tracing::error!(run_id, error = %e, "OCR unavailable; treating reading as failed");
                OcrReading {
                    success: false,
                    confidence: 0.0,
                    text: String::new(),
                }
            }
            Err(e) => {
                tracing::warn!(run_id, file = file_name, error = %e, "OCR failed for designated file");
                OcrReading {
                    success: false,
                    confidence: 0.0,
                    text: String::new(),
                }
            }
        };

        if reading.success {
            let sidecar = folder.join(sidecar_name(file_name));
            match tokio::fs::write(&sidecar, &reading.text).await {
                Ok(()) => ocr_texts.push(sidecar),
                Err(e) => {
                    tracing::warn!(run_id, path = %sidecar.display(), error = %e, "Could not write OCR text sidecar");
                }
            }
            tracing::debug!(
                run_id,
                file = file_name,
                confidence = reading.confidence,
                "OCR gate passed"
            );
        } else {
            let rejected = folder.join(format!("{file_name}{REJECTED_SUFFIX}"));
            if let Err(e) = tokio::fs::rename(&path, &rejected).await {
                tracing::error!(run_id, file = file_name, error = %e, "Could not quarantine rejected file");
            } else {
                tracing::warn!(
                    run_id,
                    file = file_name,
                    confidence = reading.confidence,
                    "OCR gate rejected designated file"
                );
            }
        }
        reading
    }
}

/// `results_initial.png` gets its text at `results_initial.ocr.txt`.
fn sidecar_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.to_string());
    format!("{stem}.ocr.txt")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Passes or fails by file name; everything not listed passes.
    struct NameFake {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl TextExtractor for NameFake {
        async fn extract(&self, image: &Path) -> Result<OcrReading, OcrError> {
            let name = image.file_name().unwrap().to_string_lossy().to_string();
            if self.failing.contains(&name.as_str()) {
                Ok(OcrReading {
                    success: false,
                    confidence: 8.5,
                    text: String::new(),
                })
            } else {
                Ok(OcrReading {
                    success: true,
                    confidence: 93.0,
                    text: "Regression Summary\nR2=0.83".into(),
                })
            }
        }
    }

    struct BrokenFake;

    #[async_trait]
    impl TextExtractor for BrokenFake {
        async fn extract(&self, _image: &Path) -> Result<OcrReading, OcrError> {
            Err(OcrError::BinaryMissing("tesseract".into()))
        }
    }

    async fn folder_with(names: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for name in names {
            tokio::fs::write(dir.path().join(name), b"png-ish")
                .await
                .unwrap();
        }
        dir
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[tokio::test]
    async fn failing_final_check_only_affects_the_final_file() {
        let dir = folder_with(&[GATED_INITIAL_FILE, GATED_FINAL_FILE, "chart_03.png"]).await;
        let gate = PostProcessor::new(Arc::new(NameFake {
            failing: vec![GATED_FINAL_FILE],
        }));

        let report = gate.process(1, dir.path()).await;

        assert!(report.summary.initial_success);
        assert!(!report.summary.final_success);
        assert_eq!(report.summary.final_confidence, 8.5);
        assert_eq!(
            names(&report.accepted),
            vec!["chart_03.png", GATED_INITIAL_FILE]
        );
        assert!(dir
            .path()
            .join(format!("{GATED_FINAL_FILE}{REJECTED_SUFFIX}"))
            .is_file());
        assert!(!dir.path().join(GATED_FINAL_FILE).exists());
        assert_eq!(names(&report.ocr_texts), vec!["results_initial.ocr.txt"]);
    }

    #[tokio::test]
    async fn passing_both_checks_keeps_everything_and_writes_sidecars() {
        let dir = folder_with(&[GATED_INITIAL_FILE, GATED_FINAL_FILE]).await;
        let gate = PostProcessor::new(Arc::new(NameFake { failing: vec![] }));

        let report = gate.process(2, dir.path()).await;

        assert!(report.summary.initial_success && report.summary.final_success);
        assert_eq!(report.accepted.len(), 2);
        assert_eq!(report.ocr_texts.len(), 2);
        let text = tokio::fs::read_to_string(dir.path().join("results_final.ocr.txt"))
            .await
            .unwrap();
        assert!(text.contains("Regression Summary"));
    }

    #[tokio::test]
    async fn missing_designated_files_fail_their_checks_without_breaking_the_rest() {
        let dir = folder_with(&["chart_01.png"]).await;
        let gate = PostProcessor::new(Arc::new(NameFake { failing: vec![] }));

        let report = gate.process(3, dir.path()).await;

        assert!(!report.summary.initial_success);
        assert!(!report.summary.final_success);
        assert_eq!(names(&report.accepted), vec!["chart_01.png"]);
        assert!(report.ocr_texts.is_empty());
    }

    #[tokio::test]
    async fn broken_ocr_rejects_designated_files_but_keeps_the_run_alive() {
        let dir = folder_with(&[GATED_INITIAL_FILE, "chart_01.png"]).await;
        let gate = PostProcessor::new(Arc::new(BrokenFake));

        let report = gate.process(4, dir.path()).await;

        assert!(!report.summary.initial_success);
        assert_eq!(names(&report.accepted), vec!["chart_01.png"]);
        assert!(dir
            .path()
            .join(format!("{GATED_INITIAL_FILE}{REJECTED_SUFFIX}"))
            .is_file());
    }

    #[tokio::test]
    async fn summary_document_is_always_written() {
        let empty = folder_with(&[]).await;
        let gate = PostProcessor::new(Arc::new(NameFake { failing: vec![] }));
        let report = gate.process(5, empty.path()).await;

        assert!(report.summary_path.is_file());
        let raw = tokio::fs::read_to_string(&report.summary_path)
            .await
            .unwrap();
        let parsed: OcrSummary = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, OcrSummary::default());
        assert!(raw.contains("initial_success"));
        assert!(raw.contains("final_text_length"));
    }

    #[tokio::test]
    async fn rejected_files_drop_out_of_the_summary_artifact_count() {
        let dir = folder_with(&[GATED_INITIAL_FILE]).await;
        let gate = PostProcessor::new(Arc::new(NameFake {
            failing: vec![GATED_INITIAL_FILE],
        }));
        let report = gate.process(6, dir.path()).await;
        assert!(report.accepted.is_empty());
    }

    #[test]
    fn sidecar_naming() {
        assert_eq!(sidecar_name("results_initial.png"), "results_initial.ocr.txt");
        assert_eq!(sidecar_name("results_final.png"), "results_final.ocr.txt");
    }

    // Summary document must never be counted as an image artifact.
    #[tokio::test]
    async fn summary_document_is_not_an_accepted_image() {
        let dir = folder_with(&["chart_01.png"]).await;
        let gate = PostProcessor::new(Arc::new(NameFake { failing: vec![] }));
        gate.process(7, dir.path()).await;
        let report = gate.process(7, dir.path()).await;
        assert_eq!(names(&report.accepted), vec!["chart_01.png"]);
        assert!(!names(&report.accepted).contains(&OCR_SUMMARY_FILE_NAME.to_string()));
    }
}
