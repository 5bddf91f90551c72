//! Error types for the `realmclock-world` crate.
//!
//! All fallible world and realm operations return [`WorldError`].

use realmclock_core::period::PeriodError;
use realmclock_core::resolver::ResolverError;
use realmclock_types::{PeriodId, RealmId, TimeError, TimeOfDay};

/// Errors that can occur during world and realm operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// An argument was malformed (blank name, unusable ratio, realm
    /// already attached elsewhere).
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Explanation of what is wrong with the argument.
        reason: String,
    },

    /// A clock reading or day length was invalid.
    #[error(transparent)]
    InvalidTimeOfDay(#[from] TimeError),

    /// A realm offset was applied while the realm had no owning world.
    #[error("realm {realm} has no owning world, can not apply a time zone offset")]
    InvalidTimeZone {
        /// Name of the realm.
        realm: String,
    },

    /// A realm offset component was negative.
    #[error("realm {realm} offset {hour}h {minute}m is out of range, offsets must be non-negative")]
    OutOfRange {
        /// Name of the realm.
        realm: String,
        /// Requested hour offset.
        hour: i32,
        /// Requested minute offset.
        minute: i32,
    },

    /// A period's start time collides with an existing period.
    #[error("period {name} starts at {start_time}, already taken by {existing}")]
    DuplicatePeriod {
        /// Name of the rejected period.
        name: String,
        /// Name of the period already holding the start time.
        existing: String,
        /// The contested start time.
        start_time: TimeOfDay,
    },

    /// A period with the same name already exists.
    #[error("a period named {name} already exists")]
    DuplicatePeriodName {
        /// The duplicated name.
        name: String,
    },

    /// The world has no periods to run.
    #[error("world {world} has no periods")]
    NoPeriods {
        /// Name of the world.
        world: String,
    },

    /// No period with this id belongs to the world.
    #[error("period not found: {0}")]
    PeriodNotFound(PeriodId),

    /// No realm with this id belongs to the world.
    #[error("realm not found: {0}")]
    RealmNotFound(RealmId),

    /// A period operation failed.
    #[error(transparent)]
    Period(#[from] PeriodError),
}

impl From<ResolverError> for WorldError {
    fn from(err: ResolverError) -> Self {
        match err {
            ResolverError::DuplicatePeriod {
                name,
                existing,
                start_time,
            } => Self::DuplicatePeriod {
                name,
                existing,
                start_time,
            },
        }
    }
}
