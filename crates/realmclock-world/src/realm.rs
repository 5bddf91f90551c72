//! Realms: subordinate clocks offset forward from their world's time.
//!
//! A [`Realm`] holds a forward offset and the adjusted time computed from
//! the last world cascade. The computation is [`Realm::adjusted_for`], a
//! pure function of the world time and the realm's own offset; the
//! cascade handler stores its result in the realm and touches nothing
//! else. Offset and adjusted time share one lock so a cascade never
//! stores a value computed from a replaced offset.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use realmclock_core::events::Subscription;
use realmclock_core::period::Period;
use realmclock_types::{DEFAULT_HOURS_PER_DAY, RealmId, TimeError, TimeOfDay};
use serde::Serialize;
use tracing::debug;

use crate::error::WorldError;
use crate::world::{TimeChanged, World, WorldShared};

/// A subordinate entity whose time runs a fixed amount ahead of its world.
pub struct Realm {
    id: RealmId,
    name: String,
    owner: RwLock<Option<Weak<WorldShared>>>,
    clock: Mutex<RealmClock>,
    cascade: Mutex<Option<Subscription>>,
}

/// Offset and the adjusted time derived from it.
#[derive(Debug, Clone, Copy)]
struct RealmClock {
    offset: TimeOfDay,
    adjusted: Option<TimeOfDay>,
}

impl RealmClock {
    fn follow(&mut self, world_time: &TimeOfDay) {
        self.adjusted = Some(world_time.offset_by(&self.offset));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build an offset of `hour:minute` on a day of `hours_per_day` hours,
/// folding whole days away.
fn offset_on_day(hour: u32, minute: u32, hours_per_day: u32) -> Result<TimeOfDay, TimeError> {
    let mut offset = TimeOfDay::midnight(hours_per_day)?;
    offset.increment_by_hour(hour).increment_by_minute(minute);
    Ok(offset)
}

impl Realm {
    /// Create an unattached realm with a zero offset.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidArgument`] if `name` is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, WorldError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(WorldError::InvalidArgument {
                reason: "realm name can not be blank".to_owned(),
            });
        }
        Ok(Self {
            id: RealmId::new(),
            name,
            owner: RwLock::new(None),
            clock: Mutex::new(RealmClock {
                offset: TimeOfDay::midnight(DEFAULT_HOURS_PER_DAY)?,
                adjusted: None,
            }),
            cascade: Mutex::new(None),
        })
    }

    /// Return the realm id.
    pub const fn id(&self) -> RealmId {
        self.id
    }

    /// Return the realm name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the forward offset from world time.
    pub fn offset(&self) -> TimeOfDay {
        lock(&self.clock).offset
    }

    /// Return the adjusted time stored by the last cascade, or `None` if
    /// the realm has not seen its world running.
    pub fn adjusted_time(&self) -> Option<TimeOfDay> {
        lock(&self.clock).adjusted
    }

    /// Return `world_time` advanced by this realm's offset.
    pub fn adjusted_for(&self, world_time: &TimeOfDay) -> TimeOfDay {
        world_time.offset_by(&self.offset())
    }

    /// Return the owning world, if attached.
    pub fn owner(&self) -> Option<World> {
        self.owner_shared().map(World::from_shared)
    }

    /// Whether the realm belongs to a world.
    pub fn is_attached(&self) -> bool {
        self.owner_shared().is_some()
    }

    /// Return the live realm time: the owner's current time plus the
    /// offset. `None` when detached or when the owner is stopped.
    pub fn current_time(&self) -> Option<TimeOfDay> {
        let world = self.owner_shared()?;
        world.current_time().map(|now| self.adjusted_for(&now))
    }

    /// Return the owner's period in effect at this realm's local time.
    pub fn current_period(&self) -> Option<Arc<Period>> {
        let world = self.owner_shared()?;
        let local = world.current_time().map(|now| self.adjusted_for(&now))?;
        world.resolve(&local)
    }

    /// Set the forward offset from world time and recompute the adjusted
    /// time if the world is running.
    ///
    /// Offsets longer than a day wrap around it.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidTimeZone`] if the realm has no owning
    /// world, or [`WorldError::OutOfRange`] if a component is negative.
    pub fn apply_time_zone_offset(&self, hour: i32, minute: i32) -> Result<(), WorldError> {
        let Some(world) = self.owner_shared() else {
            return Err(WorldError::InvalidTimeZone {
                realm: self.name.clone(),
            });
        };
        let out_of_range = || WorldError::OutOfRange {
            realm: self.name.clone(),
            hour,
            minute,
        };
        let hours = u32::try_from(hour).map_err(|_err| out_of_range())?;
        let minutes = u32::try_from(minute).map_err(|_err| out_of_range())?;

        let offset = offset_on_day(hours, minutes, world.hours_per_day)?;
        {
            let mut clock = lock(&self.clock);
            clock.offset = offset;
            if let Some(now) = world.current_time() {
                clock.follow(&now);
            }
        }

        debug!(realm = %self.name, %offset, "realm offset applied");
        Ok(())
    }

    /// Leave the owning world. A no-op if not attached.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::RealmNotFound`] if the owner no longer lists
    /// this realm.
    pub fn detach(&self) -> Result<(), WorldError> {
        match self.owner() {
            Some(world) => world.remove_realm(self.id).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Take a serializable snapshot of the realm.
    pub fn status(&self) -> RealmStatus {
        RealmStatus {
            id: self.id,
            name: self.name.clone(),
            offset: self.offset(),
            adjusted_time: self.adjusted_time(),
        }
    }

    fn owner_shared(&self) -> Option<Arc<WorldShared>> {
        self.owner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade)
    }

    fn follow(&self, world_time: &TimeOfDay) {
        lock(&self.clock).follow(world_time);
    }

    /// Bind the realm to `world` and subscribe it to the world's cascade.
    ///
    /// The offset is carried over onto the world's day length. `now` is
    /// the world time, if running.
    pub(crate) fn attach(
        self: &Arc<Self>,
        world: &Arc<WorldShared>,
        now: Option<TimeOfDay>,
    ) -> Result<(), WorldError> {
        let mut owner = self.owner.write().unwrap_or_else(PoisonError::into_inner);
        if owner.as_ref().and_then(Weak::upgrade).is_some() {
            return Err(WorldError::InvalidArgument {
                reason: format!("realm {} already belongs to a world", self.name),
            });
        }

        {
            let mut clock = lock(&self.clock);
            let offset = clock.offset;
            clock.offset = offset_on_day(offset.hour(), offset.minute(), world.hours_per_day)?;
        }

        let realm = Arc::downgrade(self);
        let subscription = world.time_changed.subscribe(move |change: &TimeChanged| {
            if let Some(realm) = realm.upgrade() {
                realm.follow(&change.time);
            }
        });
        *lock(&self.cascade) = Some(subscription);
        *owner = Some(Arc::downgrade(world));

        if let Some(now) = now {
            self.follow(&now);
        }
        Ok(())
    }

    /// Drop the owner and the cascade subscription.
    pub(crate) fn release(&self) {
        *self.owner.write().unwrap_or_else(PoisonError::into_inner) = None;
        *lock(&self.cascade) = None;
    }
}

impl core::fmt::Debug for Realm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Realm")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("offset", &self.offset())
            .field("adjusted_time", &self.adjusted_time())
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl core::fmt::Display for Realm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let offset = self.offset();
        write!(
            f,
            "{} (+{}h{:02}m)",
            self.name,
            offset.hour(),
            offset.minute()
        )
    }
}

/// Serializable snapshot of a realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealmStatus {
    /// Realm id.
    pub id: RealmId,
    /// Realm name.
    pub name: String,
    /// Forward offset from world time.
    pub offset: TimeOfDay,
    /// Adjusted time from the last cascade.
    pub adjusted_time: Option<TimeOfDay>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> TimeOfDay {
        TimeOfDay::standard(hour, minute).unwrap()
    }

    #[test]
    fn blank_name_is_rejected() {
        assert!(matches!(
            Realm::new(""),
            Err(WorldError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn offset_without_owner_is_invalid_time_zone() {
        let realm = Realm::new("Drifting").unwrap();
        assert!(matches!(
            realm.apply_time_zone_offset(1, 0),
            Err(WorldError::InvalidTimeZone { .. })
        ));
        assert!(realm.current_time().is_none());
        assert!(realm.owner().is_none());
    }

    #[test]
    fn negative_offset_is_out_of_range() {
        let world = World::new("w").unwrap();
        let realm = world.add_realm(Realm::new("Westreach").unwrap()).unwrap();
        assert!(matches!(
            realm.apply_time_zone_offset(-1, 0),
            Err(WorldError::OutOfRange { hour: -1, .. })
        ));
        assert!(matches!(
            realm.apply_time_zone_offset(0, -30),
            Err(WorldError::OutOfRange { minute: -30, .. })
        ));
        assert_eq!(realm.offset(), at(0, 0));
    }

    #[test]
    fn offset_wraps_around_the_day() {
        let world = World::new("w").unwrap();
        let realm = world.add_realm(Realm::new("Far East").unwrap()).unwrap();
        realm.apply_time_zone_offset(26, 90).unwrap();
        assert_eq!(realm.offset(), at(3, 30));
        assert_eq!(realm.offset().minutes_since_midnight(), 210);
    }

    #[test]
    fn adjusted_for_adds_offset_with_wraparound() {
        let world = World::new("w").unwrap();
        let realm = world.add_realm(Realm::new("Eastmarch").unwrap()).unwrap();
        realm.apply_time_zone_offset(3, 45).unwrap();

        assert_eq!(realm.adjusted_for(&at(10, 0)), at(13, 45));
        assert_eq!(realm.adjusted_for(&at(22, 30)), at(2, 15));
    }

    #[test]
    fn realm_cannot_join_two_worlds() {
        let first = World::new("first").unwrap();
        let second = World::new("second").unwrap();
        let realm = first.add_realm(Realm::new("Contested").unwrap()).unwrap();

        assert!(matches!(
            second.add_realm(Arc::clone(&realm)),
            Err(WorldError::InvalidArgument { .. })
        ));
        assert_eq!(realm.owner().unwrap().name(), "first");
        assert!(second.realms().is_empty());
    }

    #[test]
    fn detach_releases_owner_and_is_repeatable() {
        let world = World::new("w").unwrap();
        let realm = world.add_realm(Realm::new("Nomad").unwrap()).unwrap();
        assert!(realm.is_attached());

        realm.detach().unwrap();
        assert!(!realm.is_attached());
        assert!(world.realms().is_empty());
        realm.detach().unwrap();

        let other = World::new("other").unwrap();
        other.add_realm(Arc::clone(&realm)).unwrap();
        assert_eq!(realm.owner().unwrap().name(), "other");
    }

    #[test]
    fn display_shows_offset() {
        let world = World::new("w").unwrap();
        let realm = world.add_realm(Realm::new("Isles").unwrap()).unwrap();
        realm.apply_time_zone_offset(2, 5).unwrap();
        assert_eq!(realm.to_string(), "Isles (+2h05m)");
    }

    #[tokio::test(start_paused = true)]
    async fn offset_changes_race_cleanly_with_cascades() {
        let world = World::new("w").unwrap();
        world.define_period("Dawn", 6, 0).unwrap();
        world.define_period("Day", 6, 1).unwrap();
        let realm = world.add_realm(Realm::new("Borderlands").unwrap()).unwrap();
        world.start_at(at(6, 0)).unwrap();

        let writer = {
            let realm = Arc::clone(&realm);
            std::thread::spawn(move || {
                for minute in 0..200 {
                    realm.apply_time_zone_offset(1, minute % 60).unwrap();
                }
            })
        };
        for _ in 0..50 {
            world.start_at(at(6, 0)).unwrap();
            world.start_at(at(6, 1)).unwrap();
        }
        writer.join().unwrap();

        // Whichever write landed last, the stored value agrees with the
        // final offset.
        let expected = realm.adjusted_for(&world.current_time().unwrap());
        assert_eq!(realm.adjusted_time(), Some(expected));
        assert_eq!(realm.offset(), at(1, 19));
        world.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn attaching_to_running_world_computes_adjusted_time() {
        let world = World::new("w").unwrap();
        world.define_period("Day", 6, 0).unwrap();
        world.start_at_first().unwrap();

        let realm = world.add_realm(Realm::new("Late Joiner").unwrap()).unwrap();
        assert_eq!(realm.adjusted_time(), Some(at(6, 0)));

        realm.apply_time_zone_offset(1, 15).unwrap();
        assert_eq!(realm.adjusted_time(), Some(at(7, 15)));
        assert_eq!(realm.current_time(), Some(at(7, 15)));
        assert_eq!(realm.current_period().unwrap().name(), "Day");
        world.shutdown().await;
    }
}
