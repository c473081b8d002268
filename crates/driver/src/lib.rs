//! Driver for the external statistics tool.
//!
//! The tool is a licensed desktop application with no API, no exit code,
//! and no completion signal. Everything in this crate works from the
//! outside: files handed over through the OS opener, script execution
//! triggered through UI automation helpers, completion inferred from the
//! task folder and the process table, and output vetted by an OCR gate.
//!
//! [`driver::ToolDriver`] composes the pieces into a single attempt.

pub mod automation;
pub mod completion;
pub mod driver;
pub mod failure;
mod font;
pub mod launch;
pub mod monitor;
pub mod ocr;
pub mod postprocess;
pub mod probe;
pub mod process;
pub mod taskfolder;

pub use driver::{AttemptReport, DriverConfig, RunContext, ToolDriver};
