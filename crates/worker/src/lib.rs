//! The statrig worker: owns run execution end to end.
//!
//! The worker pulls queued runs from the database, drives the external
//! tool through `statrig-driver`, and writes each run's one terminal
//! record. Admission is policy-driven: queue mode off dispatches
//! everything as it arrives, queue mode on advances a strict
//! oldest-first line, one run at a time, after each terminal
//! transition.

pub mod config;
pub mod dispatch;
pub mod intake;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

pub use config::WorkerConfig;
pub use orchestrator::{ExecuteOutcome, Orchestrator};
pub use scheduler::AdmissionScheduler;
pub use store::{CommitOutcome, PgRunStore, RunStore, StoreError};
