//! Artifact entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use statrig_core::types::{DbId, Timestamp};

/// A row from the `artifacts` table.
///
/// Owned by its run; rows exist only for files that are durably on disk.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Artifact {
    pub id: DbId,
    pub run_id: DbId,
    /// One of the `statrig_core::artifacts::KIND_*` values.
    pub kind: String,
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
    pub created_at: Timestamp,
}

/// DTO for registering a new artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateArtifact {
    pub kind: String,
    pub storage_key: String,
    pub file_name: String,
    pub mime_type: String,
}
