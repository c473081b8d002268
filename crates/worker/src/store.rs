//! Persistence seam between the orchestrator and the database.
//!
//! The orchestrator and scheduler talk to a [`RunStore`] trait rather
//! than to the repositories directly, so tests can swap in an in-memory
//! store and exercise admission and commit behavior without Postgres.

use async_trait::async_trait;
use statrig_core::types::DbId;
use statrig_db::models::artifact::CreateArtifact;
use statrig_db::models::run::{Run, TerminalUpdate};
use statrig_db::models::setting::{KEY_MAX_WAIT_SECS, KEY_QUEUE_MODE};
use statrig_db::repositories::{ArtifactRepo, RunRepo, SettingRepo};
use statrig_db::DbPool;
use thiserror::Error;

/// Errors surfaced by the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result of the single terminal write at the end of an attempt.
#[derive(Debug)]
pub enum CommitOutcome {
    /// The row transitioned; carries the updated run.
    Committed(Run),
    /// The guard refused: the row was already settled (for example a
    /// cancel landed while the attempt was flying). Not an error and
    /// never retried.
    Refused,
}

/// Storage operations the worker needs.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Fetch a run by id.
    async fn load(&self, id: DbId) -> Result<Option<Run>, StoreError>;

    /// Write the terminal outcome of an attempt. Guarded: a row that is
    /// no longer RUNNING-or-QUEUED is left untouched and reported as
    /// [`CommitOutcome::Refused`].
    async fn commit_terminal(
        &self,
        id: DbId,
        update: &TerminalUpdate,
    ) -> Result<CommitOutcome, StoreError>;

    /// Number of runs currently marked RUNNING.
    async fn count_running(&self) -> Result<i64, StoreError>;

    /// The QUEUED run that has waited longest, if any.
    async fn oldest_queued(&self) -> Result<Option<Run>, StoreError>;

    /// QUEUED runs oldest-first, up to `limit`.
    async fn list_queued(&self, limit: i64) -> Result<Vec<Run>, StoreError>;

    /// Record an artifact row for a file that is already on disk.
    async fn register_artifact(
        &self,
        run_id: DbId,
        input: &CreateArtifact,
    ) -> Result<(), StoreError>;

    /// Live queue-mode toggle, read at the moment of use.
    async fn queue_mode_enabled(&self) -> Result<bool, StoreError>;

    /// Live completion-wait ceiling override, seconds.
    async fn max_wait_secs(&self) -> Result<Option<u64>, StoreError>;
}

/// Postgres-backed store delegating to the repository layer.
pub struct PgRunStore {
    pool: DbPool,
}

impl PgRunStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn load(&self, id: DbId) -> Result<Option<Run>, StoreError> {
        Ok(RunRepo::find_by_id(&self.pool, id).await?)
    }

    async fn commit_terminal(
        &self,
        id: DbId,
        update: &TerminalUpdate,
    ) -> Result<CommitOutcome, StoreError> {
        match RunRepo::commit_terminal(&self.pool, id, update).await? {
            Some(run) => Ok(CommitOutcome::Committed(run)),
            None => Ok(CommitOutcome::Refused),
        }
    }

    async fn count_running(&self) -> Result<i64, StoreError> {
        Ok(RunRepo::count_running(&self.pool).await?)
    }

    async fn oldest_queued(&self) -> Result<Option<Run>, StoreError> {
        Ok(RunRepo::oldest_queued(&self.pool).await?)
    }

    async fn list_queued(&self, limit: i64) -> Result<Vec<Run>, StoreError> {
        Ok(RunRepo::list_queued(&self.pool, limit).await?)
    }

    async fn register_artifact(
        &self,
        run_id: DbId,
        input: &CreateArtifact,
    ) -> Result<(), StoreError> {
        ArtifactRepo::create(&self.pool, run_id, input).await?;
        Ok(())
    }

    async fn queue_mode_enabled(&self) -> Result<bool, StoreError> {
        Ok(SettingRepo::get_bool(&self.pool, KEY_QUEUE_MODE, false).await?)
    }

    async fn max_wait_secs(&self) -> Result<Option<u64>, StoreError> {
        Ok(SettingRepo::get_u64(&self.pool, KEY_MAX_WAIT_SECS).await?)
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------
