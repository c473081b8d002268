//! Run entity models and DTOs for the execution engine.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use statrig_core::types::{DbId, Timestamp};

use super::status::{RunStatus, StatusId};

/// A row from the `runs` table.
///
/// `finished_at` is set iff the status is terminal; `image_count` is
/// meaningful only for succeeded runs; `started_at` is backfilled by the
/// terminal commit because intermediate state is never written.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Run {
    pub id: DbId,
    pub project_id: DbId,
    pub task_name: String,
    /// Opaque task-folder key. Unset rows fail fast at execution time.
    pub external_task_id: Option<String>,
    pub status_id: StatusId,
    pub message: Option<String>,
    pub image_count: Option<i32>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub deleted_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// DTO for enqueueing a new run.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRun {
    pub project_id: DbId,
    pub task_name: String,
    pub external_task_id: Option<String>,
}

/// Terminal fields written by the single commit at the end of an attempt.
#[derive(Debug, Clone)]
pub struct TerminalUpdate {
    /// Must be one of the terminal statuses; the repository guard refuses
    /// to touch an already-settled row either way.
    pub status: RunStatus,
    pub message: String,
    pub image_count: Option<i32>,
    /// When the attempt had to resolve the folder key itself.
    pub external_task_id: Option<String>,
    /// Wall-clock start of the attempt, backfilled if the row has none.
    pub started_at: Timestamp,
}
