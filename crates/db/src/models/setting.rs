//! Runtime setting entity for the live key/value settings table.

use serde::Serialize;
use sqlx::FromRow;
use statrig_core::types::Timestamp;

/// Admission-control toggle: when true, at most one run may execute
/// system-wide and queued runs are dispatched FIFO.
pub const KEY_QUEUE_MODE: &str = "queue_mode";

/// Per-deployment override of the completion detector's max wait, in
/// seconds. Read at the moment each attempt starts.
pub const KEY_MAX_WAIT_SECS: &str = "max_wait_secs";

/// A row from the `runtime_settings` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuntimeSetting {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: Timestamp,
}
