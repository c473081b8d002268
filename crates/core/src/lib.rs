//! Pure domain logic for the statrig run engine.
//!
//! Everything here is side-effect free: run lifecycle rules, the
//! completion-verdict evaluation, analysis-script header handling, and
//! artifact naming conventions. The crate has zero internal dependencies
//! so db, driver, and worker can all build on it.

pub mod artifacts;
pub mod completion;
pub mod lifecycle;
pub mod script;
pub mod types;
