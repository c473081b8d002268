//! Status helper enum mapping to the `run_statuses` SMALLINT lookup table.
//!
//! Variant discriminants match the seed data order (1-based) so the enum
//! can be bound directly into queries.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Run lifecycle status.
    RunStatus {
        Queued = 1,
        Running = 2,
        Succeeded = 3,
        Failed = 4,
        Canceled = 5,
    }
}

impl RunStatus {
    /// Human-readable name matching `core::lifecycle::state_machine`.
    pub fn name(self) -> &'static str {
        statrig_core::lifecycle::state_machine::status_name(self.id())
    }
}
