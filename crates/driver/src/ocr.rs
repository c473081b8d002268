//! Text extraction over output images.
//!
//! Wraps the `tesseract` command-line binary and reduces its TSV output
//! to the one question the gate asks: did this image contain legible
//! text, and with what confidence. A missing or broken binary is an
//! operational condition, not a run killer; callers treat any error as
//! a failed reading for that image.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Default binary name, resolved through PATH.
pub const DEFAULT_OCR_BINARY: &str = "tesseract";

/// Upper bound for one extraction.
pub const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum mean word confidence for a reading to count as legible.
/// Renders of the tool's result views score far above this; noise and
/// blank canvases score close to zero.
pub const MIN_WORD_CONFIDENCE: f64 = 40.0;

/// Result of one extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrReading {
    /// Whether the image passed the legibility check.
    pub success: bool,
    /// Mean confidence over recognized words, 0 to 100.
    pub confidence: f64,
    /// Recognized text, line structure preserved.
    pub text: String,
}

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR binary '{0}' not found on PATH")]
    BinaryMissing(String),

    #[error("OCR failed on {image}: {message}")]
    Failed { image: String, message: String },

    #[error("OCR timed out after {0:?}")]
    TimedOut(Duration),
}

/// Extracts text from one image. Production shells out to tesseract;
/// tests substitute canned readings.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, image: &Path) -> Result<OcrReading, OcrError>;
}

/// Extractor wrapping the tesseract CLI in TSV mode.
pub struct TesseractExtractor {
    binary: String,
    timeout: Duration,
}

impl TesseractExtractor {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_OCR_BINARY, DEFAULT_OCR_TIMEOUT)
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract(&self, image: &Path) -> Result<OcrReading, OcrError> {
        let result = tokio::time::timeout(
            self.timeout,
            Command::new(&self.binary)
                .arg(image)
                .args(["stdout", "--psm", "6", "tsv"])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::BinaryMissing(self.binary.clone()));
            }
            Ok(Err(e)) => {
                return Err(OcrError::Failed {
                    image: image.display().to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => return Err(OcrError::TimedOut(self.timeout)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed {
                image: image.display().to_string(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Reduce tesseract TSV to a reading. Word rows carry a nonnegative
/// confidence in column 11 and the word in column 12; everything else
/// (page, block, and line rows, malformed lines) is skipped. Line
/// numbers from columns 5 and 6 drive the rebuilt text layout.
pub fn parse_tsv(tsv: &str) -> OcrReading {
    let mut words: Vec<(u32, u32, String)> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();

    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let Ok(conf) = cols[10].trim().parse::<f64>() else {
            continue;
        };
        if conf < 0.0 {
            continue;
        }
        let word = cols[11].trim();
        if word.is_empty() {
            continue;
        }
        let block: u32 = cols[2].trim().parse().unwrap_or(0);
        let line_num: u32 = cols[4].trim().parse().unwrap_or(0);
        words.push((block, line_num, word.to_string()));
        confidences.push(conf);
    }

    if words.is_empty() {
        return OcrReading {
            success: false,
            confidence: 0.0,
            text: String::new(),
        };
    }

    let confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
    let mut text = String::new();
    let mut current_line: Option<(u32, u32)> = None;
    for (block, line_num, word) in words {
        match current_line {
            Some(key) if key == (block, line_num) => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        current_line = Some((block, line_num));
        text.push_str(&word);
    }

    OcrReading {
        success: confidence >= MIN_WORD_CONFIDENCE,
        confidence,
        text,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
