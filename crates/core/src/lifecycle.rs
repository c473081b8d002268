//! Run lifecycle constants and state machine.
//!
//! Lives in `core` (zero internal deps) so the repository layer, the
//! worker, and any future CLI tooling can all share one set of rules.

// ---------------------------------------------------------------------------
// Status ids
// ---------------------------------------------------------------------------

/// Run status IDs matching `run_statuses` seed data (1-based SMALLSERIAL).
///
/// Intentionally duplicated from the `db` crate's `RunStatus` enum because
/// `core` must have zero internal deps.
pub const STATUS_QUEUED: i16 = 1;
pub const STATUS_RUNNING: i16 = 2;
pub const STATUS_SUCCEEDED: i16 = 3;
pub const STATUS_FAILED: i16 = 4;
pub const STATUS_CANCELED: i16 = 5;

/// Statuses from which no further transition is allowed.
pub const TERMINAL_STATUS_IDS: [i16; 3] = [STATUS_SUCCEEDED, STATUS_FAILED, STATUS_CANCELED];

/// True when `status` is one of the terminal statuses.
pub fn is_terminal(status: i16) -> bool {
    TERMINAL_STATUS_IDS.contains(&status)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::*;

    /// Returns the set of valid target status IDs reachable from `from_status`.
    ///
    /// Terminal states (Succeeded=3, Failed=4, Canceled=5) return an empty
    /// slice because run status transitions are monotonic.
    pub fn valid_transitions(from_status: i16) -> &'static [i16] {
        match from_status {
            // Queued -> Running, Succeeded, Failed, Canceled.
            // Queued -> terminal is real: a precondition failure commits the
            // run straight to Failed without the row ever holding Running,
            // and a whole successful attempt commits Queued -> Succeeded
            // because intermediate visibility is events-only.
            STATUS_QUEUED => &[STATUS_RUNNING, STATUS_SUCCEEDED, STATUS_FAILED, STATUS_CANCELED],
            // Running -> Succeeded, Failed, Canceled
            STATUS_RUNNING => &[STATUS_SUCCEEDED, STATUS_FAILED, STATUS_CANCELED],
            // Terminal states: Succeeded, Failed, Canceled
            STATUS_SUCCEEDED | STATUS_FAILED | STATUS_CANCELED => &[],
            // Unknown status: no transitions allowed
            _ => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: i16, to: i16) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: i16, to: i16) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            let from_name = status_name(from);
            let to_name = status_name(to);
            Err(format!(
                "Invalid transition: {from_name} ({from}) -> {to_name} ({to})"
            ))
        }
    }

    /// Human-readable name for a status ID (for error messages).
    pub fn status_name(id: i16) -> &'static str {
        match id {
            STATUS_QUEUED => "Queued",
            STATUS_RUNNING => "Running",
            STATUS_SUCCEEDED => "Succeeded",
            STATUS_FAILED => "Failed",
            STATUS_CANCELED => "Canceled",
            _ => "Unknown",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
