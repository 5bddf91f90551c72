//! Shared type definitions for the Realmclock world time simulation.
//!
//! This crate holds the leaf types every other crate in the workspace
//! builds on: the in-game clock reading and the typed identifiers for
//! worlds, realms, and time periods.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for entity identifiers
//! - [`time`] -- [`TimeOfDay`], an hour/minute reading on a circular day

pub mod ids;
pub mod time;

pub use ids::{PeriodId, RealmId, WorldId};
pub use time::{DEFAULT_HOURS_PER_DAY, MINUTES_PER_HOUR, TimeError, TimeOfDay};
