//! Analysis-script header handling.
//!
//! Task folders are prepared with a data file and an analysis script. The
//! script must begin with a provenance banner plus one open-data statement
//! pointing the external tool at the task's data file. Preparation can run
//! more than once for the same folder, so injection has to be idempotent:
//! an existing header is replaced in place, never duplicated.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Header grammar
// ---------------------------------------------------------------------------

/// Comment prefix recognized by the external tool's script language.
pub const COMMENT_PREFIX: char = '*';

/// Regex pattern matching a (trimmed) open-data statement line.
pub const OPEN_DATA_PATTERN: &str = r#"(?i)^OPEN\s+DATA\s+FILE\s*=\s*"[^"]*"\s*\.?$"#;

/// Compiled open-data matcher. Compiled once, reused forever.
static OPEN_DATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(OPEN_DATA_PATTERN).expect("valid regex"));

/// Render the canonical header for one run.
///
/// Deliberately contains no timestamp so the render is deterministic for a
/// given `(data_path, run_id)` pair and re-injection stays byte-stable.
pub fn render_header(data_path: &str, run_id: DbId) -> String {
    format!(
        "* StatRig analysis task, run {run_id}. This header is rewritten on every\n\
         * preparation; keep the open-data statement as the first statement.\n\
         OPEN DATA FILE=\"{data_path}\".\n"
    )
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Line index (0-based) of the open-data statement terminating a leading
/// header block, if one exists.
///
/// A header block is any run of blank or comment lines from the top of the
/// script; the first substantive line decides. If it is an open-data
/// statement the whole block up to and including it is the header.
fn header_end_line(script: &str) -> Option<usize> {
    for (i, line) in script.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIX) {
            continue;
        }
        if OPEN_DATA_RE.is_match(trimmed) {
            return Some(i);
        }
        return None;
    }
    None
}

/// True when the script already begins with a replaceable open-data header.
pub fn has_open_data_header(script: &str) -> bool {
    header_end_line(script).is_some()
}

// ---------------------------------------------------------------------------
// Injection
// ---------------------------------------------------------------------------

/// Inject (or replace) the open-data header at the top of `script`.
///
/// If a leading comment block followed by an open-data statement is found it
/// is replaced in place; otherwise the header is prepended with a separating
/// blank line. Line endings are normalized to `\n` and the result always
/// ends with a newline, so applying this twice yields byte-identical output
/// to applying it once.
pub fn inject_open_data_header(script: &str, data_path: &str, run_id: DbId) -> String {
    let header = render_header(data_path, run_id);
    match header_end_line(script) {
        Some(end) => {
            let remainder: String = script
                .lines()
                .skip(end + 1)
                .map(|line| format!("{line}\n"))
                .collect();
            format!("{header}{remainder}")
        }
        None => {
            let body: String = script.lines().map(|line| format!("{line}\n")).collect();
            if body.is_empty() {
                header
            } else {
                format!("{header}\n{body}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
