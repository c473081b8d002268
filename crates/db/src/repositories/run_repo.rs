//! Repository for the `runs` table.
//!
//! The terminal update only matches rows still in a committable status,
//! so a settled row can never be rewritten. The worker's exactly-once
//! commit protocol relies on that guard rather than on row locks.

use sqlx::PgPool;
use statrig_core::types::DbId;

use crate::models::run::{CreateRun, Run, TerminalUpdate};
use crate::models::status::{RunStatus, StatusId};

/// Column list for `runs` queries.
const COLUMNS: &str = "\
    id, project_id, task_name, external_task_id, status_id, \
    message, image_count, \
    created_at, started_at, finished_at, deleted_at, updated_at";

/// Statuses a terminal commit may replace.
const COMMITTABLE_STATUSES: [StatusId; 2] = [
    RunStatus::Queued as StatusId,
    RunStatus::Running as StatusId,
];

/// Provides CRUD operations for runs.
pub struct RunRepo;

impl RunRepo {
    /// Create a new queued run.
    pub async fn create(pool: &PgPool, input: &CreateRun) -> Result<Run, sqlx::Error> {
        let query = format!(
            "INSERT INTO runs (project_id, task_name, external_task_id, status_id) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(input.project_id)
            .bind(&input.task_name)
            .bind(&input.external_task_id)
            .bind(RunStatus::Queued.id())
            .fetch_one(pool)
            .await
    }

    /// Find a run by its ID. Soft-deleted rows are invisible.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Run>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM runs WHERE id = $1 AND deleted_at IS NULL");
        sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Count runs currently marked running.
    pub async fn count_running(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM runs WHERE status_id = $1 AND deleted_at IS NULL",
        )
        .bind(RunStatus::Running.id())
        .fetch_one(pool)
        .await
    }

    /// The oldest queued run: stable FIFO by creation time, id as tiebreak.
    pub async fn oldest_queued(pool: &PgPool) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM runs \
             WHERE status_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(RunStatus::Queued.id())
            .fetch_optional(pool)
            .await
    }

    /// Queued runs oldest-first, up to `limit`. Used by the intake loop.
    pub async fn list_queued(pool: &PgPool, limit: i64) -> Result<Vec<Run>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM runs \
             WHERE status_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(RunStatus::Queued.id())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// The single terminal write at the end of an attempt.
    ///
    /// Sets the terminal status, message, image count and `finished_at`,
    /// backfills `started_at` if unset, and keeps an existing
    /// `external_task_id` unless the update carries a new one.
    ///
    /// Returns the updated row, or `None` when the run was missing,
    /// soft-deleted, or already settled (the monotonic guard).
    pub async fn commit_terminal(
        pool: &PgPool,
        id: DbId,
        update: &TerminalUpdate,
    ) -> Result<Option<Run>, sqlx::Error> {
        let query = format!(
            "UPDATE runs \
             SET status_id = $2, \
                 message = $3, \
                 image_count = $4, \
                 external_task_id = COALESCE($5, external_task_id), \
                 started_at = COALESCE(started_at, $6), \
                 finished_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL AND status_id IN ($7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Run>(&query)
            .bind(id)
            .bind(update.status.id())
            .bind(&update.message)
            .bind(update.image_count)
            .bind(&update.external_task_id)
            .bind(update.started_at)
            .bind(COMMITTABLE_STATUSES[0])
            .bind(COMMITTABLE_STATUSES[1])
            .fetch_optional(pool)
            .await
    }

    /// Cancel a run if it has not settled yet.
    ///
    /// Platform-side operation; the worker itself never cancels. Returns
    /// `true` if the row transitioned, `false` if it was already terminal.
    pub async fn cancel(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE runs \
             SET status_id = $2, finished_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL AND status_id IN ($3, $4)",
        )
        .bind(id)
        .bind(RunStatus::Canceled.id())
        .bind(COMMITTABLE_STATUSES[0])
        .bind(COMMITTABLE_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a run. The row and its artifacts stay on disk and in
    /// the table; it just becomes invisible to every other query here.
    pub async fn soft_delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE runs SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
                .bind(id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
