//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct
//! matching the database row, plus the DTOs the repositories accept.

pub mod artifact;
pub mod run;
pub mod setting;
pub mod status;
