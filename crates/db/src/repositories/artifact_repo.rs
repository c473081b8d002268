//! Repository for the `artifacts` table.

use sqlx::PgPool;
use statrig_core::types::DbId;

use crate::models::artifact::{Artifact, CreateArtifact};

/// Column list shared across queries.
const COLUMNS: &str = "id, run_id, kind, storage_key, file_name, mime_type, created_at";

/// Provides registration and lookup for run artifacts.
pub struct ArtifactRepo;

impl ArtifactRepo {
    /// Register an artifact for a run.
    ///
    /// Call only after the underlying file is durably on disk; an artifact
    /// row is a promise that the bytes exist.
    pub async fn create(
        pool: &PgPool,
        run_id: DbId,
        input: &CreateArtifact,
    ) -> Result<Artifact, sqlx::Error> {
        let query = format!(
            "INSERT INTO artifacts (run_id, kind, storage_key, file_name, mime_type) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Artifact>(&query)
            .bind(run_id)
            .bind(&input.kind)
            .bind(&input.storage_key)
            .bind(&input.file_name)
            .bind(&input.mime_type)
            .fetch_one(pool)
            .await
    }

    /// List a run's artifacts, oldest first.
    pub async fn list_for_run(pool: &PgPool, run_id: DbId) -> Result<Vec<Artifact>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM artifacts WHERE run_id = $1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Artifact>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }
}
