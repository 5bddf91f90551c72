//! Worlds, realms, and the time cascade between them.
//!
//! A [`World`] owns the authoritative period set and runs the clock of
//! its active period. When the active period changes, the world fans the
//! new time out to every attached [`Realm`], each of which applies its own
//! forward offset.
//!
//! # Modules
//!
//! - [`error`] -- [`WorldError`], the error taxonomy for world and realm
//!   operations.
//! - [`realm`] -- [`Realm`], a subordinate clock offset from its world.
//! - [`world`] -- [`World`], [`WorldBuilder`], the cascade, and
//!   [`WorldStatus`] snapshots.

pub mod error;
pub mod realm;
pub mod world;

pub use error::WorldError;
pub use realm::{Realm, RealmStatus};
pub use world::{PeriodStatus, TimeChanged, World, WorldBuilder, WorldStatus};
