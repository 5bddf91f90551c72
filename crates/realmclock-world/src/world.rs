//! The authoritative world clock and its cascade to realms.
//!
//! A [`World`] owns the period set and exactly one active period. The
//! active period's clock drives the world: on every tick the world
//! re-resolves the active period for the new time and, when it changes,
//! resets the old period, initializes the new one, and raises a
//! [`TimeChanged`] notification. Every attached [`Realm`] recomputes its
//! offset-adjusted time from that notification.
//!
//! # Design Principles
//!
//! - Cascades are serialized by a dedicated lock, taken before the state
//!   lock and held until the realm fan-out returns. The state lock is
//!   released before the fan-out, so realm handlers may query the world.
//! - The realm fan-out runs in parallel. Each realm handler only writes
//!   the realm's own adjusted time.
//! - Broker messages are published after the cascade lock is released.
//! - Handlers registered with [`World::on_time_changed`] must not call
//!   [`World::start_at`], [`World::stop`], or [`World::remove_period`];
//!   those take the cascade lock the handler runs under.

use std::iter;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Local;
use realmclock_core::broker::{EngineMessage, SharedBroker};
use realmclock_core::events::{EventHub, Subscription};
use realmclock_core::period::{Period, TickUnit, TimeUpdated};
use realmclock_core::resolver::PeriodResolver;
use realmclock_core::timer::TimerFault;
use realmclock_types::{DEFAULT_HOURS_PER_DAY, PeriodId, RealmId, TimeOfDay, WorldId};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use crate::error::WorldError;
use crate::realm::{Realm, RealmStatus};

/// Real hours per in-game day used by [`World::new`].
pub const DEFAULT_GAME_DAY_TO_REAL_HOUR_RATIO: f64 = 0.75;

/// World-level notification that the active period changed.
#[derive(Debug, Clone)]
pub struct TimeChanged {
    /// The world whose period changed.
    pub world_id: WorldId,
    /// The period that was active before, if the world was running.
    pub previous: Option<Arc<Period>>,
    /// The period active now.
    pub current: Arc<Period>,
    /// World time after the change.
    pub time: TimeOfDay,
}

/// Builder for [`World`].
pub struct WorldBuilder {
    name: String,
    hours_per_day: u32,
    ratio: f64,
    broker: Option<SharedBroker>,
    faults: Option<UnboundedSender<TimerFault>>,
}

impl core::fmt::Debug for WorldBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorldBuilder")
            .field("name", &self.name)
            .field("hours_per_day", &self.hours_per_day)
            .field("ratio", &self.ratio)
            .field("broker", &self.broker.is_some())
            .finish_non_exhaustive()
    }
}

impl WorldBuilder {
    /// Set the number of hours in an in-game day.
    #[must_use]
    pub fn hours_per_day(mut self, hours_per_day: u32) -> Self {
        self.hours_per_day = hours_per_day;
        self
    }

    /// Set how many real-world hours one in-game day lasts.
    #[must_use]
    pub fn game_day_to_real_hour_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Publish lifecycle messages through `broker`.
    #[must_use]
    pub fn broker(mut self, broker: SharedBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Deliver period clock faults to `sink`.
    #[must_use]
    pub fn fault_sink(mut self, sink: UnboundedSender<TimerFault>) -> Self {
        self.faults = Some(sink);
        self
    }

    /// Build the world.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidArgument`] for a blank name or a ratio
    /// that is not a positive finite number, and
    /// [`WorldError::InvalidTimeOfDay`] for a zero-hour day.
    pub fn build(self) -> Result<World, WorldError> {
        if self.name.trim().is_empty() {
            return Err(WorldError::InvalidArgument {
                reason: "world name can not be blank".to_owned(),
            });
        }
        if !self.ratio.is_finite() || self.ratio <= 0.0 {
            return Err(WorldError::InvalidArgument {
                reason: format!(
                    "game day to real hour ratio must be positive, got {}",
                    self.ratio
                ),
            });
        }
        // Rejects a zero-hour day with the clock's own error.
        TimeOfDay::midnight(self.hours_per_day)?;

        Ok(World {
            shared: Arc::new(WorldShared {
                id: WorldId::new(),
                name: self.name,
                hours_per_day: self.hours_per_day,
                ratio: self.ratio,
                cascade: Mutex::new(()),
                state: Mutex::new(WorldState::default()),
                time_changed: EventHub::new(),
                broker: self.broker,
                faults: self.faults,
            }),
        })
    }
}

/// The top-level simulated clock owner.
///
/// `World` is a cheap handle; clones share the same world.
#[derive(Clone)]
pub struct World {
    shared: Arc<WorldShared>,
}

/// The active period and the subscription to its clock.
struct ActivePeriod {
    period: Arc<Period>,
    _ticks: Subscription,
}

#[derive(Default)]
struct WorldState {
    resolver: PeriodResolver,
    active: Option<ActivePeriod>,
    realms: Vec<Arc<Realm>>,
    current_time: Option<TimeOfDay>,
}

/// State shared by world handles, period subscriptions, and realms.
pub(crate) struct WorldShared {
    pub(crate) id: WorldId,
    pub(crate) name: String,
    pub(crate) hours_per_day: u32,
    ratio: f64,
    cascade: Mutex<()>,
    state: Mutex<WorldState>,
    pub(crate) time_changed: EventHub<TimeChanged>,
    broker: Option<SharedBroker>,
    faults: Option<UnboundedSender<TimerFault>>,
}

impl WorldShared {
    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cascade(&self) -> MutexGuard<'_, ()> {
        self.cascade.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Real seconds per in-game time unit.
    fn time_factor(&self) -> f64 {
        self.ratio / f64::from(self.hours_per_day)
    }

    pub(crate) fn current_time(&self) -> Option<TimeOfDay> {
        self.state().current_time
    }

    pub(crate) fn resolve(&self, time: &TimeOfDay) -> Option<Arc<Period>> {
        self.state().resolver.resolve(time).cloned()
    }

    pub(crate) fn publish(&self, message: EngineMessage) {
        if let Some(broker) = &self.broker {
            broker.publish(message);
        }
    }

    /// Swap the active period for `period` and start its clock.
    ///
    /// The previous active period, if any, is reset first.
    fn activate(
        self: &Arc<Self>,
        state: &mut WorldState,
        period: Arc<Period>,
    ) -> Result<TimeChanged, WorldError> {
        let previous = state.active.take().map(|active| {
            let ActivePeriod { period, _ticks: ticks } = active;
            drop(ticks);
            period.reset();
            period
        });

        let world = Arc::downgrade(self);
        let ticks = period.on_time_updated(move |update| {
            if let Some(shared) = world.upgrade() {
                shared.on_period_tick(update);
            }
        });
        if let Err(err) = period.initialize(self.time_factor()) {
            state.current_time = None;
            return Err(err.into());
        }

        let time = period.current_time();
        state.current_time = Some(time);
        state.active = Some(ActivePeriod {
            period: Arc::clone(&period),
            _ticks: ticks,
        });

        info!(
            world = %self.name,
            previous = previous.as_ref().map_or("none", |p| p.name()),
            current = %period.name(),
            %time,
            "active period changed"
        );
        Ok(TimeChanged {
            world_id: self.id,
            previous,
            current: period,
            time,
        })
    }

    /// Fan a change out to realms and subscribers.
    fn announce(&self, change: &TimeChanged) {
        debug!(
            world = %self.name,
            subscribers = self.time_changed.subscriber_count(),
            "cascading world time"
        );
        self.time_changed.publish_parallel(change);
    }

    fn publish_change(&self, change: &TimeChanged) {
        self.publish(EngineMessage::WorldTimeChanged {
            world_id: self.id,
            world: self.name.clone(),
            previous: change.previous.as_ref().map(|p| p.name().to_owned()),
            current: change.current.name().to_owned(),
            time: change.time,
        });
    }

    /// Handle a tick of the active period's clock.
    fn on_period_tick(self: &Arc<Self>, update: &TimeUpdated) {
        let cascade = self.cascade();
        let change = {
            let mut state = self.state();
            let is_active = state
                .active
                .as_ref()
                .is_some_and(|active| active.period.id() == update.period_id);
            if !is_active {
                // A late tick from a period that was swapped out.
                return;
            }

            state.current_time = Some(update.time);
            let Some(resolved) = state.resolver.resolve(&update.time).cloned() else {
                return;
            };
            if resolved.id() == update.period_id {
                return;
            }

            match self.activate(&mut state, resolved) {
                Ok(change) => change,
                Err(err) => {
                    error!(world = %self.name, error = %err, "failed to swap active period");
                    return;
                }
            }
        };

        self.announce(&change);
        drop(cascade);
        self.publish_change(&change);
    }
}

impl World {
    /// Start building a world named `name` with a 24-hour day and the
    /// default real-time ratio.
    pub fn builder(name: impl Into<String>) -> WorldBuilder {
        WorldBuilder {
            name: name.into(),
            hours_per_day: DEFAULT_HOURS_PER_DAY,
            ratio: DEFAULT_GAME_DAY_TO_REAL_HOUR_RATIO,
            broker: None,
            faults: None,
        }
    }

    /// Create a world with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidArgument`] if `name` is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, WorldError> {
        Self::builder(name).build()
    }

    pub(crate) const fn from_shared(shared: Arc<WorldShared>) -> Self {
        Self { shared }
    }

    /// Return the world id.
    pub fn id(&self) -> WorldId {
        self.shared.id
    }

    /// Return the world name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Return the number of hours in an in-game day.
    pub fn hours_per_day(&self) -> u32 {
        self.shared.hours_per_day
    }

    /// Return how many real-world hours one in-game day lasts.
    pub fn game_day_to_real_hour_ratio(&self) -> f64 {
        self.shared.ratio
    }

    /// Return the factor handed to periods: ratio divided by hours per day.
    pub fn time_adjustment_factor(&self) -> f64 {
        self.shared.time_factor()
    }

    /// Return the world time, or `None` before [`start_at`](Self::start_at).
    pub fn current_time(&self) -> Option<TimeOfDay> {
        self.shared.current_time()
    }

    /// Return the active period, or `None` while stopped.
    pub fn active_period(&self) -> Option<Arc<Period>> {
        self.shared
            .state()
            .active
            .as_ref()
            .map(|active| Arc::clone(&active.period))
    }

    /// Whether the world clock is running.
    pub fn is_running(&self) -> bool {
        self.shared.state().active.is_some()
    }

    /// Return the periods in start-time order.
    pub fn periods(&self) -> Vec<Arc<Period>> {
        self.shared.state().resolver.periods().to_vec()
    }

    /// Return the period with `id`.
    pub fn period(&self, id: PeriodId) -> Option<Arc<Period>> {
        self.shared
            .state()
            .resolver
            .periods()
            .iter()
            .find(|p| p.id() == id)
            .cloned()
    }

    /// Return the period that would be active at `time`.
    pub fn resolve(&self, time: &TimeOfDay) -> Option<Arc<Period>> {
        self.shared.resolve(time)
    }

    /// Add a period to the world.
    ///
    /// A period built for a different day length is re-homed onto this
    /// world's day. The period publishes through the world's broker. If
    /// the world is running, the period becomes eligible on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::DuplicatePeriod`] or
    /// [`WorldError::DuplicatePeriodName`] if the start time or name is
    /// taken, leaving the period set unchanged.
    pub fn add_period(&self, period: Period) -> Result<Arc<Period>, WorldError> {
        let hours_per_day = self.shared.hours_per_day;
        let period = if period.start_time().hours_per_day() == hours_per_day {
            period
        } else {
            period.rehomed(hours_per_day)?
        };
        let period = self.attach_collaborators(period);

        let mut state = self.shared.state();
        if state
            .resolver
            .periods()
            .iter()
            .any(|existing| existing.name() == period.name())
        {
            return Err(WorldError::DuplicatePeriodName {
                name: period.name().to_owned(),
            });
        }

        let period = Arc::new(period);
        let resolver = PeriodResolver::new(
            state
                .resolver
                .periods()
                .iter()
                .cloned()
                .chain(iter::once(Arc::clone(&period))),
        )?;
        state.resolver = resolver;
        drop(state);

        debug!(
            world = %self.shared.name,
            period = %period.name(),
            start = %period.start_time(),
            "period added"
        );
        Ok(period)
    }

    /// Create and add a period starting at `hour:minute`.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidTimeOfDay`] if the start does not fit
    /// the day, plus the errors of [`add_period`](Self::add_period).
    pub fn define_period(
        &self,
        name: impl Into<String>,
        hour: u32,
        minute: u32,
    ) -> Result<Arc<Period>, WorldError> {
        let start = TimeOfDay::new(hour, minute, self.shared.hours_per_day)?;
        self.add_period(Period::new(name, start)?)
    }

    fn attach_collaborators(&self, period: Period) -> Period {
        let period = match &self.shared.broker {
            Some(broker) => period.with_broker(Arc::clone(broker)),
            None => period,
        };
        match &self.shared.faults {
            Some(sink) => period.with_fault_sink(sink.clone()),
            None => period,
        }
    }

    /// Remove a period.
    ///
    /// Removing the active period swaps to the period now in effect at
    /// the world time, or stops the world if none is left.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::PeriodNotFound`] if no such period exists.
    pub fn remove_period(&self, id: PeriodId) -> Result<Arc<Period>, WorldError> {
        let shared = &self.shared;
        let cascade = shared.cascade();
        let (removed, change) = {
            let mut state = shared.state();
            let removed = state
                .resolver
                .periods()
                .iter()
                .find(|p| p.id() == id)
                .cloned()
                .ok_or(WorldError::PeriodNotFound(id))?;
            state.resolver = PeriodResolver::new(
                state
                    .resolver
                    .periods()
                    .iter()
                    .filter(|p| p.id() != id)
                    .cloned(),
            )?;

            let was_active = state
                .active
                .as_ref()
                .is_some_and(|active| active.period.id() == id);
            let replacement = state
                .current_time
                .and_then(|time| state.resolver.resolve(&time).cloned());

            let change = match (was_active, replacement) {
                (true, Some(next)) => Some(shared.activate(&mut state, next)?),
                (true, None) => {
                    state.active = None;
                    state.current_time = None;
                    removed.reset();
                    None
                }
                (false, _) => None,
            };
            (removed, change)
        };

        if let Some(change) = &change {
            shared.announce(change);
        }
        drop(cascade);
        if let Some(change) = &change {
            shared.publish_change(change);
        }

        info!(world = %shared.name, period = %removed.name(), "period removed");
        Ok(removed)
    }

    /// Start the clock at the period in effect at `time`.
    ///
    /// The period's clock starts from the period's own start time, so the
    /// world time becomes that start time. Starting a running world
    /// restarts it. Attached realms are updated before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::NoPeriods`] if the world has no periods,
    /// [`WorldError::InvalidTimeOfDay`] if `time` does not fit the day, or
    /// [`WorldError::Period`] if the period clock can not start.
    pub fn start_at(&self, time: TimeOfDay) -> Result<Arc<Period>, WorldError> {
        let time = time.with_hours_per_day(self.shared.hours_per_day)?;
        let shared = &self.shared;
        let cascade = shared.cascade();
        let change = {
            let mut state = shared.state();
            let period = state.resolver.resolve(&time).cloned().ok_or_else(|| {
                WorldError::NoPeriods {
                    world: shared.name.clone(),
                }
            })?;
            shared.activate(&mut state, period)?
        };

        info!(
            world = %shared.name,
            period = %change.current.name(),
            time = %change.time,
            "world started"
        );
        shared.announce(&change);
        drop(cascade);
        shared.publish_change(&change);
        Ok(change.current)
    }

    /// Start the clock at the period in effect at the host's local wall
    /// clock time, falling back to the earliest period.
    ///
    /// # Errors
    ///
    /// See [`start_at`](Self::start_at).
    pub fn start(&self) -> Result<Arc<Period>, WorldError> {
        let now = TimeOfDay::from_wall_clock(&Local::now(), self.shared.hours_per_day)?;
        let start = self
            .resolve(&now)
            .or_else(|| self.periods().into_iter().next())
            .map_or(now, |period| period.start_time());
        self.start_at(start)
    }

    /// Start the clock at the earliest period.
    ///
    /// # Errors
    ///
    /// See [`start_at`](Self::start_at).
    pub fn start_at_first(&self) -> Result<Arc<Period>, WorldError> {
        let first = self
            .shared
            .state()
            .resolver
            .first()
            .map(|period| period.start_time())
            .ok_or_else(|| WorldError::NoPeriods {
                world: self.shared.name.clone(),
            })?;
        self.start_at(first)
    }

    /// Stop the clock and reset every period.
    ///
    /// Realms keep their last adjusted time.
    pub fn stop(&self) {
        let _cascade = self.shared.cascade();
        let mut state = self.shared.state();
        state.active = None;
        state.current_time = None;
        for period in state.resolver.periods() {
            period.reset();
        }
        info!(world = %self.shared.name, "world stopped");
    }

    /// Stop the clock and wait for every in-flight period tick to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let periods = self.periods();
        for period in periods {
            period.settle().await;
        }
    }

    /// Register `handler` for every change of active period.
    ///
    /// Handlers may run concurrently with each other.
    pub fn on_time_changed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TimeChanged) + Send + Sync + 'static,
    {
        self.shared.time_changed.subscribe(handler)
    }

    /// Attach a realm. Its adjusted time is computed immediately if the
    /// world is running.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::InvalidArgument`] if the realm already
    /// belongs to a world.
    pub fn add_realm(&self, realm: impl Into<Arc<Realm>>) -> Result<Arc<Realm>, WorldError> {
        let realm = realm.into();
        {
            let mut state = self.shared.state();
            realm.attach(&self.shared, state.current_time)?;
            state.realms.push(Arc::clone(&realm));
        }

        info!(world = %self.shared.name, realm = %realm.name(), "realm attached");
        self.shared.publish(EngineMessage::RealmAttached {
            world_id: self.shared.id,
            realm_id: realm.id(),
            realm: realm.name().to_owned(),
        });
        Ok(realm)
    }

    /// Attach several realms, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`add_realm`](Self::add_realm). Realms attached before the
    /// failure stay attached.
    pub fn add_realms<I, R>(&self, realms: I) -> Result<Vec<Arc<Realm>>, WorldError>
    where
        I: IntoIterator<Item = R>,
        R: Into<Arc<Realm>>,
    {
        realms.into_iter().map(|realm| self.add_realm(realm)).collect()
    }

    /// Detach a realm.
    ///
    /// # Errors
    ///
    /// Returns [`WorldError::RealmNotFound`] if the realm is not attached.
    pub fn remove_realm(&self, id: RealmId) -> Result<Arc<Realm>, WorldError> {
        let realm = {
            let mut state = self.shared.state();
            let index = state
                .realms
                .iter()
                .position(|realm| realm.id() == id)
                .ok_or(WorldError::RealmNotFound(id))?;
            state.realms.remove(index)
        };
        realm.release();

        info!(world = %self.shared.name, realm = %realm.name(), "realm detached");
        self.shared.publish(EngineMessage::RealmDetached {
            world_id: self.shared.id,
            realm_id: realm.id(),
            realm: realm.name().to_owned(),
        });
        Ok(realm)
    }

    /// Detach several realms, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`remove_realm`](Self::remove_realm).
    pub fn remove_realms<I>(&self, ids: I) -> Result<Vec<Arc<Realm>>, WorldError>
    where
        I: IntoIterator<Item = RealmId>,
    {
        ids.into_iter().map(|id| self.remove_realm(id)).collect()
    }

    /// Return the attached realms in attachment order.
    pub fn realms(&self) -> Vec<Arc<Realm>> {
        self.shared.state().realms.clone()
    }

    /// Return the attached realm with `id`.
    pub fn realm(&self, id: RealmId) -> Option<Arc<Realm>> {
        self.shared
            .state()
            .realms
            .iter()
            .find(|realm| realm.id() == id)
            .cloned()
    }

    /// Take a serializable snapshot of the world.
    pub fn status(&self) -> WorldStatus {
        let (current_time, active, periods, realms) = {
            let state = self.shared.state();
            (
                state.current_time,
                state.active.as_ref().map(|a| a.period.name().to_owned()),
                state.resolver.periods().to_vec(),
                state.realms.clone(),
            )
        };

        WorldStatus {
            id: self.shared.id,
            name: self.shared.name.clone(),
            hours_per_day: self.shared.hours_per_day,
            game_day_to_real_hour_ratio: self.shared.ratio,
            current_time,
            active_period: active,
            periods: periods.iter().map(|p| PeriodStatus::of(p)).collect(),
            realms: realms.iter().map(|r| r.status()).collect(),
        }
    }
}

impl core::fmt::Debug for World {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("World")
            .field("id", &self.shared.id)
            .field("name", &self.shared.name)
            .field("hours_per_day", &self.shared.hours_per_day)
            .field("current_time", &self.current_time())
            .finish_non_exhaustive()
    }
}

impl core::fmt::Display for World {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (active, realms) = {
            let state = self.shared.state();
            (
                state.active.as_ref().map(|a| a.period.name().to_owned()),
                state.realms.len(),
            )
        };
        write!(
            f,
            "{} - {} - with {realms} realms.",
            self.shared.name,
            active.as_deref().unwrap_or("stopped")
        )
    }
}

/// Serializable snapshot of a world.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldStatus {
    /// World id.
    pub id: WorldId,
    /// World name.
    pub name: String,
    /// Hours in an in-game day.
    pub hours_per_day: u32,
    /// Real hours per in-game day.
    pub game_day_to_real_hour_ratio: f64,
    /// World time, if running.
    pub current_time: Option<TimeOfDay>,
    /// Name of the active period, if running.
    pub active_period: Option<String>,
    /// Every period in start-time order.
    pub periods: Vec<PeriodStatus>,
    /// Every attached realm.
    pub realms: Vec<RealmStatus>,
}

/// Serializable snapshot of a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodStatus {
    /// Period id.
    pub id: PeriodId,
    /// Period name.
    pub name: String,
    /// Start of the period.
    pub start_time: TimeOfDay,
    /// The period clock's current reading.
    pub current_time: TimeOfDay,
    /// Whether the period is enabled.
    pub enabled: bool,
    /// Tick unit of the running clock.
    pub tick_unit: Option<TickUnit>,
}

impl PeriodStatus {
    fn of(period: &Period) -> Self {
        Self {
            id: period.id(),
            name: period.name().to_owned(),
            start_time: period.start_time(),
            current_time: period.current_time(),
            enabled: period.is_enabled(),
            tick_unit: period.tick_unit(),
        }
    }
}
