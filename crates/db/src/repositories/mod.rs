//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod artifact_repo;
pub mod run_repo;
pub mod setting_repo;

pub use artifact_repo::ArtifactRepo;
pub use run_repo::RunRepo;
pub use setting_repo::SettingRepo;
