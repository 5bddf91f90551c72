//! Named periods of the in-game day (Morning, Evening, ...).
//!
//! A [`Period`] has a fixed start time and owns the clock that advances
//! while it is the active period of a world. [`Period::initialize`]
//! derives a tick pace from the world time factor and starts an
//! [`EngineTimer`]; every tick moves the period's current time forward by
//! one [`TickUnit`] and raises a [`TimeUpdated`] notification.
//! [`Period::reset`] stops the clock, rewinds to the start time, and
//! disables the period.
//!
//! # Lifecycle
//!
//! `Idle -> Initialized (enabled, clock running) -> Reset (disabled,
//! clock stopped)`, and back to `Initialized` as often as the world
//! selects the period again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use realmclock_types::{PeriodId, TimeError, TimeOfDay};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::broker::{EngineMessage, SharedBroker};
use crate::events::{EventHub, Subscription};
use crate::timer::{EngineTimer, Schedule, TimerError, TimerFault};

/// Below this many real seconds per in-game minute the clock ticks by the
/// hour instead, to bound notification frequency.
pub const HOUR_TICK_THRESHOLD_SECS: f64 = 0.4;

/// Seconds in a real-world minute, and minutes in an in-game hour.
const SIXTY: f64 = 60.0;

/// Errors raised by period operations.
#[derive(Debug, thiserror::Error)]
pub enum PeriodError {
    /// An argument was malformed (blank name, unusable time factor).
    #[error("invalid period argument: {reason}")]
    InvalidArgument {
        /// Explanation of what is wrong with the argument.
        reason: String,
    },

    /// The start time is not a valid reading.
    #[error(transparent)]
    Time(#[from] TimeError),

    /// The period clock could not be started.
    #[error("period clock failed: {source}")]
    Timer {
        /// The underlying timer error.
        #[from]
        source: TimerError,
    },
}

/// How far the period clock moves on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickUnit {
    /// One in-game minute per tick.
    Minute,
    /// One in-game hour per tick.
    Hour,
}

/// The tick unit and real-world interval a period clock runs at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Distance covered by one tick.
    pub unit: TickUnit,
    /// Real time between ticks.
    pub interval: Duration,
}

impl Pacing {
    /// Derive the clock pace for a world time factor.
    ///
    /// One in-game minute lasts `60 * world_time_factor` real seconds.
    /// When that is shorter than [`HOUR_TICK_THRESHOLD_SECS`] the clock
    /// ticks once per in-game hour (sixty times the minute interval), so
    /// the simulated rate stays the same.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvalidArgument`] if the factor is not a
    /// positive finite number or yields an interval of zero.
    pub fn from_time_factor(world_time_factor: f64) -> Result<Self, PeriodError> {
        if !world_time_factor.is_finite() || world_time_factor <= 0.0 {
            return Err(PeriodError::InvalidArgument {
                reason: format!("world time factor must be positive, got {world_time_factor}"),
            });
        }

        let minute_secs = SIXTY * world_time_factor;
        let (unit, secs) = if minute_secs < HOUR_TICK_THRESHOLD_SECS {
            (TickUnit::Hour, minute_secs * SIXTY)
        } else {
            (TickUnit::Minute, minute_secs)
        };

        let interval = Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| PeriodError::InvalidArgument {
                reason: format!(
                    "world time factor {world_time_factor} gives an unusable tick interval"
                ),
            })?;

        Ok(Self { unit, interval })
    }
}

/// Notification raised on every period clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUpdated {
    /// The period whose clock ticked.
    pub period_id: PeriodId,
    /// The period's time after the tick.
    pub time: TimeOfDay,
}

/// State shared between a period and its running clock.
#[derive(Debug)]
struct PeriodClock {
    current: Mutex<TimeOfDay>,
    enabled: AtomicBool,
}

impl PeriodClock {
    fn current(&self) -> MutexGuard<'_, TimeOfDay> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, unit: TickUnit) -> TimeOfDay {
        let mut current = self.current();
        match unit {
            TickUnit::Minute => current.increment_by_minute(1),
            TickUnit::Hour => current.increment_by_hour(1),
        };
        *current
    }
}

/// A named interval of the day with its own advancing clock.
///
/// Two periods compare equal when they start at the same hour and
/// minute; a world never holds two such periods.
pub struct Period {
    id: PeriodId,
    name: String,
    start_time: TimeOfDay,
    created_at: DateTime<Utc>,
    clock: Arc<PeriodClock>,
    timer: EngineTimer<PeriodClock>,
    pacing: Mutex<Option<Pacing>>,
    updated: EventHub<TimeUpdated>,
    broker: Option<SharedBroker>,
}

impl Period {
    /// Create an idle period starting at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvalidArgument`] if `name` is blank.
    pub fn new(name: impl Into<String>, start_time: TimeOfDay) -> Result<Self, PeriodError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PeriodError::InvalidArgument {
                reason: "period name can not be blank".to_owned(),
            });
        }

        let clock = Arc::new(PeriodClock {
            current: Mutex::new(start_time),
            enabled: AtomicBool::new(false),
        });
        let timer = EngineTimer::from_arc(format!("period:{name}"), Arc::clone(&clock));

        Ok(Self {
            id: PeriodId::new(),
            name,
            start_time,
            created_at: Utc::now(),
            clock,
            timer,
            pacing: Mutex::new(None),
            updated: EventHub::new(),
            broker: None,
        })
    }

    /// Publish lifecycle messages through `broker`.
    #[must_use]
    pub fn with_broker(mut self, broker: SharedBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Deliver clock faults to `sink`.
    #[must_use]
    pub fn with_fault_sink(mut self, sink: UnboundedSender<TimerFault>) -> Self {
        self.timer.set_fault_sink(sink);
        self
    }

    /// Return a copy of this period re-homed onto a day of
    /// `hours_per_day` hours. The copy keeps the name but gets a fresh id,
    /// no subscribers, and no broker.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::Time`] if the start time does not fit the
    /// new day length.
    pub fn rehomed(&self, hours_per_day: u32) -> Result<Self, PeriodError> {
        Self::new(
            self.name.clone(),
            self.start_time.with_hours_per_day(hours_per_day)?,
        )
    }

    /// Return the period id.
    pub const fn id(&self) -> PeriodId {
        self.id
    }

    /// Return the period name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the time of day this period begins.
    pub const fn start_time(&self) -> TimeOfDay {
        self.start_time
    }

    /// Return the period's current clock reading.
    pub fn current_time(&self) -> TimeOfDay {
        *self.clock.current()
    }

    /// Return when the period was created.
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Return how long the period has existed.
    pub fn time_alive(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }

    /// Whether the period is enabled.
    pub fn is_enabled(&self) -> bool {
        self.clock.enabled.load(Ordering::Acquire)
    }

    /// Whether the period clock is ticking.
    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Return the pace of the running clock, if initialized.
    pub fn pacing(&self) -> Option<Pacing> {
        *self.pacing_slot()
    }

    /// Return the unit of the running clock, if initialized.
    pub fn tick_unit(&self) -> Option<TickUnit> {
        self.pacing().map(|pacing| pacing.unit)
    }

    /// Mark the period enabled. The clock is unaffected.
    pub fn enable(&self) {
        self.clock.enabled.store(true, Ordering::Release);
    }

    /// Mark the period disabled. The clock is unaffected.
    pub fn disable(&self) {
        self.clock.enabled.store(false, Ordering::Release);
    }

    /// Register `handler` for every clock tick.
    pub fn on_time_updated<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&TimeUpdated) + Send + Sync + 'static,
    {
        self.updated.subscribe(handler)
    }

    /// Reset the period, then start its clock at the pace derived from
    /// `world_time_factor` and enable it.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvalidArgument`] for an unusable time
    /// factor, or [`PeriodError::Timer`] if the clock can not start.
    pub fn initialize(&self, world_time_factor: f64) -> Result<Pacing, PeriodError> {
        let pacing = Pacing::from_time_factor(world_time_factor)?;
        self.rewind();

        let hub = self.updated.clone();
        let period_id = self.id;
        let unit = pacing.unit;
        self.timer
            .start(Schedule::repeating(pacing.interval), move |clock, _| {
                let time = clock.advance(unit);
                debug!(%period_id, %time, "period clock ticked");
                hub.publish(&TimeUpdated { period_id, time });
                Ok(())
            })?;

        *self.pacing_slot() = Some(pacing);
        self.enable();

        info!(
            period = %self.name,
            start = %self.start_time,
            unit = ?pacing.unit,
            interval = ?pacing.interval,
            "period initialized"
        );
        self.publish(EngineMessage::PeriodInitialized {
            period_id: self.id,
            name: self.name.clone(),
            start_time: self.start_time,
            interval_ms: u64::try_from(pacing.interval.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(pacing)
    }

    /// Stop the clock, restore the start time, and disable the period.
    ///
    /// A no-op for the clock if it never started. `PeriodReset` is only
    /// published when the period was running or enabled. A tick already in
    /// flight finishes; use [`shutdown`](Self::shutdown) to wait for it.
    pub fn reset(&self) {
        let was_active = self.timer.is_running() || self.is_enabled();
        self.rewind();
        if !was_active {
            return;
        }
        debug!(period = %self.name, "period reset");
        self.publish(EngineMessage::PeriodReset {
            period_id: self.id,
            name: self.name.clone(),
        });
    }

    /// Reset the period and wait for an in-flight tick to finish.
    pub async fn shutdown(&self) {
        self.reset();
        self.settle().await;
    }

    /// Wait for an in-flight tick to finish without touching the period.
    pub async fn settle(&self) {
        self.timer.shutdown().await;
    }

    fn rewind(&self) {
        self.timer.stop();
        *self.clock.current() = self.start_time;
        *self.pacing_slot() = None;
        self.disable();
    }

    fn pacing_slot(&self) -> MutexGuard<'_, Option<Pacing>> {
        self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, message: EngineMessage) {
        if let Some(broker) = &self.broker {
            broker.publish(message);
        }
    }
}

impl Drop for Period {
    fn drop(&mut self) {
        self.rewind();
    }
}

impl PartialEq for Period {
    fn eq(&self, other: &Self) -> bool {
        self.start_time == other.start_time
    }
}

impl Eq for Period {}

impl core::fmt::Debug for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Period")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("start_time", &self.start_time)
            .field("current_time", &self.current_time())
            .field("enabled", &self.is_enabled())
            .field("pacing", &self.pacing())
            .finish_non_exhaustive()
    }
}

impl core::fmt::Display for Period {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} starting at {} with a current time of {}",
            self.name,
            self.start_time,
            self.current_time()
        )
    }
}
