//! Engine timer: a cancelable, recurring callback primitive.
//!
//! An [`EngineTimer`] is bound to a payload at construction and hands that
//! payload back to its callback on every tick. [`EngineTimer::start`]
//! (synchronous callback) and [`EngineTimer::start_async`] (awaited
//! callback) begin firing according to a [`Schedule`]: wait the start
//! delay, fire once, then fire again after every interval until the fire
//! count is reached (`0` = unbounded) or the timer is stopped.
//!
//! # Guarantees
//!
//! - Ticks of one timer never overlap. The next delay starts only after
//!   the previous callback has returned (or its future has completed).
//! - [`EngineTimer::stop`] is idempotent and cooperative: it interrupts a
//!   pending delay immediately but lets an in-flight callback finish.
//!   [`EngineTimer::shutdown`] additionally awaits that callback.
//! - A callback that returns `Err` or panics stops its timer. The fault is
//!   logged and, when a sink was attached with
//!   [`EngineTimer::with_fault_sink`], delivered as a [`TimerFault`].
//! - Dropping the timer stops it.
//!
//! # Lifecycle
//!
//! `Idle -> Running -> Stopping -> Stopped`, where `Stopping` covers the
//! window between a stop request and the in-flight callback returning.
//! A stopped timer can be started again.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Boxed error type a tick callback may fail with.
pub type TickError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one tick callback.
pub type TickResult = Result<(), TickError>;

/// Errors raised when starting a timer.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// A schedule argument was malformed (negative or not a number).
    #[error("invalid timer argument: {reason}")]
    InvalidArgument {
        /// Explanation of what is wrong with the argument.
        reason: String,
    },

    /// The timer is already running; stop it before starting it again.
    #[error("timer {name} is already running")]
    AlreadyRunning {
        /// Name of the timer.
        name: String,
    },

    /// The timer was started outside of a tokio runtime.
    #[error("timer {name} can not start outside a tokio runtime")]
    NoRuntime {
        /// Name of the timer.
        name: String,
    },
}

/// When and how often a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Delay before the first tick.
    start_delay: Duration,
    /// Delay between the end of one tick and the start of the next.
    interval: Duration,
    /// Number of ticks before the timer stops itself (0 = unbounded).
    fire_count: u32,
}

impl Schedule {
    /// Create a schedule from durations.
    pub const fn new(start_delay: Duration, interval: Duration, fire_count: u32) -> Self {
        Self {
            start_delay,
            interval,
            fire_count,
        }
    }

    /// An unbounded schedule whose first tick also waits one interval.
    pub const fn repeating(interval: Duration) -> Self {
        Self::new(interval, interval, 0)
    }

    /// Create a schedule from millisecond values, as they appear in
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidArgument`] if either value is negative,
    /// NaN, infinite, or too large for a [`Duration`].
    pub fn from_millis(
        start_delay_ms: f64,
        interval_ms: f64,
        fire_count: u32,
    ) -> Result<Self, TimerError> {
        Ok(Self::new(
            millis_to_duration("start delay", start_delay_ms)?,
            millis_to_duration("interval", interval_ms)?,
            fire_count,
        ))
    }

    /// Return the delay before the first tick.
    pub const fn start_delay(&self) -> Duration {
        self.start_delay
    }

    /// Return the delay between ticks.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Return the configured number of ticks (0 = unbounded).
    pub const fn fire_count(&self) -> u32 {
        self.fire_count
    }

    /// Whether the timer runs until it is stopped.
    pub const fn is_unbounded(&self) -> bool {
        self.fire_count == 0
    }

    /// Whether `fired` ticks exhaust this schedule.
    fn is_exhausted(&self, fired: u64) -> bool {
        self.fire_count > 0 && fired >= u64::from(self.fire_count)
    }
}

fn millis_to_duration(what: &str, millis: f64) -> Result<Duration, TimerError> {
    if !millis.is_finite() || millis < 0.0 {
        return Err(TimerError::InvalidArgument {
            reason: format!("{what} must be a non-negative number of milliseconds, got {millis}"),
        });
    }
    Duration::try_from_secs_f64(millis / 1000.0).map_err(|err| TimerError::InvalidArgument {
        reason: format!("{what} of {millis}ms is out of range: {err}"),
    })
}

/// Observable lifecycle phase of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    /// Never started.
    Idle,
    /// Started and not stopped; waiting for or executing a tick.
    Running,
    /// Stop requested while a tick callback was still executing.
    Stopping,
    /// No further ticks will fire.
    Stopped,
}

const PHASE_RUNNING: u8 = 1;
const PHASE_STOPPING: u8 = 2;
const PHASE_STOPPED: u8 = 3;

/// A callback failure delivered to the fault sink.
#[derive(Debug)]
pub struct TimerFault {
    /// Name of the timer whose callback failed.
    pub timer: String,
    /// Ordinal of the failing tick (1-based).
    pub fire: u64,
    /// The error returned by the callback, or the panic message.
    pub error: TickError,
}

impl core::fmt::Display for TimerFault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "timer {} failed on tick {}: {}",
            self.timer, self.fire, self.error
        )
    }
}

/// Control block for one `start` of a timer.
///
/// A fresh block is created on every start so a stale stop signal from a
/// previous run can never leak into the next.
#[derive(Debug)]
struct RunControl {
    phase: AtomicU8,
    wake: Notify,
    fires: AtomicU64,
}

impl RunControl {
    fn new() -> Self {
        Self {
            phase: AtomicU8::new(PHASE_RUNNING),
            wake: Notify::new(),
            fires: AtomicU64::new(0),
        }
    }

    fn phase(&self) -> TimerPhase {
        match self.phase.load(Ordering::Acquire) {
            PHASE_RUNNING => TimerPhase::Running,
            PHASE_STOPPING => TimerPhase::Stopping,
            _ => TimerPhase::Stopped,
        }
    }

    fn is_stop_requested(&self) -> bool {
        self.phase.load(Ordering::Acquire) != PHASE_RUNNING
    }

    fn request_stop(&self) {
        // Only a running timer moves to Stopping; Stopped stays Stopped.
        let _ = self.phase.compare_exchange(
            PHASE_RUNNING,
            PHASE_STOPPING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        // notify_one stores a permit if the loop is not waiting yet.
        self.wake.notify_one();
    }

    fn finish(&self) {
        self.phase.store(PHASE_STOPPED, Ordering::Release);
    }

    fn record_fire(&self) -> u64 {
        self.fires.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Wait `duration` unless a stop arrives first. Returns whether the
    /// loop should keep going.
    async fn pause(&self, duration: Duration) -> bool {
        if self.is_stop_requested() {
            return false;
        }
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !self.is_stop_requested();
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => !self.is_stop_requested(),
            () = self.wake.notified() => false,
        }
    }
}

/// Marks the run stopped when the driving task exits, including by panic.
struct FinishGuard(Arc<RunControl>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Handle passed to every callback invocation.
///
/// Lets a callback inspect its timer and stop it from inside a tick.
#[derive(Debug, Clone)]
pub struct TimerControl {
    name: Arc<str>,
    run: Arc<RunControl>,
}

impl TimerControl {
    /// Return the name of the timer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return how many ticks have fired in this run, including the
    /// current one.
    pub fn fires(&self) -> u64 {
        self.run.fires.load(Ordering::Acquire)
    }

    /// Request that no further ticks fire. The current tick completes.
    pub fn stop(&self) {
        self.run.request_stop();
    }

    /// Whether a stop has been requested for this run.
    pub fn is_stop_requested(&self) -> bool {
        self.run.is_stop_requested()
    }
}

type SyncCallback<T> = Box<dyn FnMut(&T, &TimerControl) -> TickResult + Send>;
type AsyncCallback<T> =
    Box<dyn FnMut(Arc<T>, TimerControl) -> BoxFuture<'static, TickResult> + Send>;

/// The two callback shapes a timer drives.
enum Callback<T> {
    Sync(SyncCallback<T>),
    Async(AsyncCallback<T>),
}

impl<T> Callback<T> {
    /// Invoke the callback once, converting a panic into a tick error.
    async fn invoke(&mut self, state: &Arc<T>, control: &TimerControl) -> TickResult {
        match self {
            Self::Sync(callback) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| callback(state.as_ref(), control)))
                    .unwrap_or_else(|payload| Err(panic_to_error(payload.as_ref())))
            }
            Self::Async(callback) => {
                let tick = callback(Arc::clone(state), control.clone());
                AssertUnwindSafe(tick)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panic_to_error(payload.as_ref())))
            }
        }
    }
}

fn panic_to_error(payload: &(dyn std::any::Any + Send)) -> TickError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    format!("callback panicked: {message}").into()
}

/// The run currently owned by a timer.
struct ActiveRun {
    control: Arc<RunControl>,
    task: Option<JoinHandle<()>>,
}

/// A cancelable, recurring callback bound to a payload of type `T`.
///
/// ```no_run
/// use std::time::Duration;
/// use realmclock_core::timer::{EngineTimer, Schedule};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let timer = EngineTimer::new("autosave", String::from("player-1"));
/// timer.start(
///     Schedule::new(Duration::from_secs(30), Duration::from_secs(60), 0),
///     |player, _timer| {
///         tracing::info!(player = %player, "saving");
///         Ok(())
///     },
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct EngineTimer<T> {
    name: Arc<str>,
    state: Arc<T>,
    run: Mutex<Option<ActiveRun>>,
    faults: Option<UnboundedSender<TimerFault>>,
}

impl<T> core::fmt::Debug for EngineTimer<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineTimer")
            .field("name", &self.name)
            .field("phase", &self.phase())
            .field("fires", &self.fires())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> EngineTimer<T> {
    /// Create an idle timer that will hand `state` to its callback.
    pub fn new(name: impl Into<String>, state: T) -> Self {
        Self::from_arc(name, Arc::new(state))
    }

    /// Create an idle timer around an already shared payload.
    pub fn from_arc(name: impl Into<String>, state: Arc<T>) -> Self {
        Self {
            name: Arc::from(name.into()),
            state,
            run: Mutex::new(None),
            faults: None,
        }
    }

    /// Deliver callback faults to `sink` in addition to logging them.
    #[must_use]
    pub fn with_fault_sink(mut self, sink: UnboundedSender<TimerFault>) -> Self {
        self.set_fault_sink(sink);
        self
    }

    /// Replace the fault sink. Applies from the next start.
    pub fn set_fault_sink(&mut self, sink: UnboundedSender<TimerFault>) {
        self.faults = Some(sink);
    }

    /// Return the timer name used in logs and faults.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the payload handed to every tick.
    pub const fn state(&self) -> &Arc<T> {
        &self.state
    }

    /// Return the current lifecycle phase.
    pub fn phase(&self) -> TimerPhase {
        lock(&self.run)
            .as_ref()
            .map_or(TimerPhase::Idle, |active| active.control.phase())
    }

    /// Whether the timer has been started and not stopped since.
    pub fn is_running(&self) -> bool {
        self.phase() == TimerPhase::Running
    }

    /// Return how many ticks have fired in the current (or last) run.
    pub fn fires(&self) -> u64 {
        lock(&self.run)
            .as_ref()
            .map_or(0, |active| active.control.fires.load(Ordering::Acquire))
    }

    /// Stop scheduling ticks. Idempotent; a no-op on an idle timer.
    ///
    /// A tick already executing is allowed to finish. Use
    /// [`shutdown`](Self::shutdown) to wait for it.
    pub fn stop(&self) {
        if let Some(active) = lock(&self.run).as_ref() {
            if active.control.phase() == TimerPhase::Running {
                debug!(timer = %self.name, "stopping timer");
            }
            active.control.request_stop();
        }
    }

    /// Stop the timer and wait for any in-flight tick to return.
    pub async fn shutdown(&self) {
        let task = {
            let mut guard = lock(&self.run);
            guard.as_mut().and_then(|active| {
                active.control.request_stop();
                active.task.take()
            })
        };
        if let Some(task) = task {
            // A JoinError means the task was cancelled or panicked; either
            // way it is no longer running.
            let _ = task.await;
        }
    }
}

impl<T: Send + Sync + 'static> EngineTimer<T> {
    /// Start firing a synchronous callback on `schedule`.
    ///
    /// The callback runs to completion before the next delay begins.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyRunning`] if the timer is running, or
    /// [`TimerError::NoRuntime`] if called outside a tokio runtime.
    pub fn start<F>(&self, schedule: Schedule, callback: F) -> Result<(), TimerError>
    where
        F: FnMut(&T, &TimerControl) -> TickResult + Send + 'static,
    {
        self.launch(schedule, Callback::Sync(Box::new(callback)))
    }

    /// Start firing an asynchronous callback on `schedule`.
    ///
    /// Each returned future is awaited to completion before the next delay
    /// begins.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::AlreadyRunning`] if the timer is running, or
    /// [`TimerError::NoRuntime`] if called outside a tokio runtime.
    pub fn start_async<F, Fut>(&self, schedule: Schedule, mut callback: F) -> Result<(), TimerError>
    where
        F: FnMut(Arc<T>, TimerControl) -> Fut + Send + 'static,
        Fut: Future<Output = TickResult> + Send + 'static,
    {
        self.launch(
            schedule,
            Callback::Async(Box::new(move |state, control| {
                callback(state, control).boxed()
            })),
        )
    }

    fn launch(&self, schedule: Schedule, callback: Callback<T>) -> Result<(), TimerError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_err| TimerError::NoRuntime {
                name: self.name.to_string(),
            })?;

        let mut guard = lock(&self.run);
        let previous = match guard.take() {
            Some(active) if active.control.phase() == TimerPhase::Running => {
                *guard = Some(active);
                return Err(TimerError::AlreadyRunning {
                    name: self.name.to_string(),
                });
            }
            Some(mut active) => active.task.take(),
            None => None,
        };

        let control = Arc::new(RunControl::new());
        let driver = Driver {
            control: TimerControl {
                name: Arc::clone(&self.name),
                run: Arc::clone(&control),
            },
            state: Arc::clone(&self.state),
            schedule,
            callback,
            faults: self.faults.clone(),
        };

        debug!(
            timer = %self.name,
            start_delay = ?schedule.start_delay,
            interval = ?schedule.interval,
            fire_count = schedule.fire_count,
            "starting timer"
        );

        let task = runtime.spawn(async move {
            // A run that is still finishing its last tick must not overlap
            // with this one.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            driver.run().await;
        });

        *guard = Some(ActiveRun {
            control,
            task: Some(task),
        });
        Ok(())
    }
}

impl<T> Drop for EngineTimer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the spawned task owns for one run.
struct Driver<T> {
    control: TimerControl,
    state: Arc<T>,
    schedule: Schedule,
    callback: Callback<T>,
    faults: Option<UnboundedSender<TimerFault>>,
}

impl<T> Driver<T> {
    async fn run(mut self) {
        let run = Arc::clone(&self.control.run);
        let _finish = FinishGuard(Arc::clone(&run));

        if !run.pause(self.schedule.start_delay).await {
            return;
        }

        loop {
            let fire = run.record_fire();
            if let Err(err) = self.callback.invoke(&self.state, &self.control).await {
                self.report(fire, err);
                return;
            }

            if self.schedule.is_exhausted(fire) {
                debug!(timer = %self.control.name, fires = fire, "timer reached its fire count");
                return;
            }

            if !run.pause(self.schedule.interval).await {
                debug!(timer = %self.control.name, fires = fire, "timer stopped");
                return;
            }
        }
    }

    fn report(&self, fire: u64, err: TickError) {
        error!(
            timer = %self.control.name,
            fire,
            error = %err,
            "timer callback failed, stopping timer"
        );
        if let Some(sink) = &self.faults {
            // The receiver may be gone; the fault has been logged regardless.
            let _ = sink.send(TimerFault {
                timer: self.control.name.to_string(),
                fire,
                error: err,
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use tokio::sync::mpsc;

    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn schedule_rejects_negative_and_nan_values() {
        assert!(matches!(
            Schedule::from_millis(-1.0, 10.0, 0),
            Err(TimerError::InvalidArgument { .. })
        ));
        assert!(matches!(
            Schedule::from_millis(0.0, -5.0, 0),
            Err(TimerError::InvalidArgument { .. })
        ));
        assert!(Schedule::from_millis(f64::NAN, 1.0, 0).is_err());
        assert!(Schedule::from_millis(0.0, f64::INFINITY, 0).is_err());

        let ok = Schedule::from_millis(1500.0, 250.0, 3).unwrap();
        assert_eq!(ok.start_delay(), ms(1500));
        assert_eq!(ok.interval(), ms(250));
        assert_eq!(ok.fire_count(), 3);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let timer = EngineTimer::new("orphan", ());
        let result = timer.start(Schedule::new(ms(0), ms(1), 0), |(), _| Ok(()));
        assert!(matches!(result, Err(TimerError::NoRuntime { .. })));
        assert_eq!(timer.phase(), TimerPhase::Idle);
    }

    #[test]
    fn new_timer_is_idle_and_keeps_payload() {
        let timer = EngineTimer::new("payload", 42_u32);
        assert_eq!(**timer.state(), 42);
        assert!(!timer.is_running());
        assert_eq!(timer.phase(), TimerPhase::Idle);
        // Stopping an idle timer is a no-op.
        timer.stop();
        assert_eq!(timer.phase(), TimerPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn start_sets_running() {
        let timer = EngineTimer::new("running", ());
        timer
            .start(Schedule::new(ms(0), ms(1), 0), |(), _| Ok(()))
            .unwrap();
        assert!(timer.is_running());
        timer.shutdown().await;
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_timer_fires_exactly_then_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let timer = EngineTimer::new("bounded", Arc::clone(&count));
        timer
            .start(Schedule::new(ms(0), ms(10), 3), |count, _| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(ms(500)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(timer.fires(), 3);
        assert!(!timer.is_running());
        assert_eq!(timer.phase(), TimerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timer_runs_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let timer = EngineTimer::new("unbounded", Arc::clone(&count));
        timer
            .start(Schedule::new(ms(5), ms(10), 0), |count, _| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(ms(200)).await;
        let before_stop = count.load(Ordering::SeqCst);
        assert!(before_stop >= 10, "only {before_stop} ticks fired");
        assert!(timer.is_running());

        timer.stop();
        assert!(!timer.is_running());
        tokio::time::sleep(ms(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), before_stop);
        assert_eq!(timer.phase(), TimerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn start_delay_is_honoured() {
        let fired = Arc::new(AtomicBool::new(false));
        let timer = EngineTimer::new("delayed", Arc::clone(&fired));
        timer
            .start(Schedule::new(ms(100), ms(10), 1), |fired, _| {
                fired.store(true, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(ms(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
        tokio::time::sleep(ms(100)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[derive(Default)]
    struct Tally {
        in_flight: AtomicBool,
        overlaps: AtomicUsize,
        completed: AtomicUsize,
    }

    async fn slow_tick(tally: Arc<Tally>, _control: TimerControl) -> TickResult {
        if tally.in_flight.swap(true, Ordering::SeqCst) {
            tally.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(ms(50)).await;
        tally.in_flight.store(false, Ordering::SeqCst);
        tally.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_async_ticks_never_overlap() {
        let timer = EngineTimer::new("slow", Tally::default());
        timer
            .start_async(Schedule::new(ms(0), ms(1), 0), slow_tick)
            .unwrap();

        tokio::time::sleep(ms(1_000)).await;
        timer.shutdown().await;

        let tally = timer.state();
        assert!(tally.completed.load(Ordering::SeqCst) > 5);
        assert_eq!(tally.overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_during_slow_tick_waits_for_it() {
        let timer = EngineTimer::new("restarted", Tally::default());
        timer
            .start_async(Schedule::new(ms(0), ms(1), 0), slow_tick)
            .unwrap();

        // The first tick is sleeping when the timer is stopped and restarted.
        tokio::time::sleep(ms(10)).await;
        timer.stop();
        timer
            .start_async(Schedule::new(ms(0), ms(1), 0), slow_tick)
            .unwrap();
        assert!(timer.is_running());

        tokio::time::sleep(ms(500)).await;
        timer.shutdown().await;

        let tally = timer.state();
        assert!(tally.completed.load(Ordering::SeqCst) > 2);
        assert_eq!(tally.overlaps.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_in_flight_tick() {
        let done = Arc::new(AtomicBool::new(false));
        let timer = EngineTimer::new("in-flight", Arc::clone(&done));
        timer
            .start_async(
                Schedule::new(ms(0), ms(1), 0),
                |done: Arc<Arc<AtomicBool>>, _| async move {
                    tokio::time::sleep(ms(100)).await;
                    done.store(true, Ordering::SeqCst);
                    Ok::<_, TickError>(())
                },
            )
            .unwrap();

        // Let the first tick begin, then stop while it sleeps.
        tokio::time::sleep(ms(10)).await;
        assert!(!done.load(Ordering::SeqCst));
        timer.shutdown().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(timer.phase(), TimerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_can_stop_its_own_timer() {
        let timer = EngineTimer::new("self-stop", ());
        timer
            .start(Schedule::new(ms(0), ms(10), 0), |(), control| {
                if control.fires() == 2 {
                    control.stop();
                }
                Ok(())
            })
            .unwrap();

        tokio::time::sleep(ms(500)).await;
        assert_eq!(timer.fires(), 2);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let timer = EngineTimer::new("idempotent", ());
        timer
            .start(Schedule::new(ms(0), ms(10), 0), |(), _| Ok(()))
            .unwrap();
        timer.stop();
        timer.stop();
        timer.shutdown().await;
        timer.stop();
        assert_eq!(timer.phase(), TimerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn starting_a_running_timer_fails() {
        let timer = EngineTimer::new("twice", ());
        timer
            .start(Schedule::new(ms(0), ms(10), 0), |(), _| Ok(()))
            .unwrap();
        let second = timer.start(Schedule::new(ms(0), ms(10), 0), |(), _| Ok(()));
        assert!(matches!(second, Err(TimerError::AlreadyRunning { .. })));
        assert!(timer.is_running());
        timer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_can_restart() {
        let count = Arc::new(AtomicUsize::new(0));
        let timer = EngineTimer::new("restart", Arc::clone(&count));
        let tick = |count: &Arc<AtomicUsize>, _: &TimerControl| -> TickResult {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        timer.start(Schedule::new(ms(0), ms(10), 2), tick).unwrap();
        tokio::time::sleep(ms(100)).await;
        assert!(!timer.is_running());

        timer.start(Schedule::new(ms(0), ms(10), 2), tick).unwrap();
        assert!(timer.is_running());
        tokio::time::sleep(ms(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(timer.fires(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_stops_and_reports() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = EngineTimer::new("faulty", ()).with_fault_sink(tx);
        timer
            .start(Schedule::new(ms(0), ms(10), 0), |(), control| {
                if control.fires() == 3 {
                    return Err("latent corruption".into());
                }
                Ok(())
            })
            .unwrap();

        let fault = rx.recv().await.unwrap();
        assert_eq!(fault.timer, "faulty");
        assert_eq!(fault.fire, 3);
        assert!(fault.to_string().contains("latent corruption"));

        tokio::time::sleep(ms(100)).await;
        assert_eq!(timer.fires(), 3);
        assert_eq!(timer.phase(), TimerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_callback_is_reported_as_fault() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = EngineTimer::new("panicky", ()).with_fault_sink(tx);
        timer
            .start(Schedule::new(ms(0), ms(10), 0), |(), _| -> TickResult {
                panic!("boom");
            })
            .unwrap();

        let fault = rx.recv().await.unwrap();
        assert_eq!(fault.fire, 1);
        assert!(fault.error.to_string().contains("boom"));
        tokio::time::sleep(ms(10)).await;
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_timer_stops_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let timer = EngineTimer::new("dropped", Arc::clone(&count));
        timer
            .start(Schedule::new(ms(0), ms(10), 0), |count, _| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        tokio::time::sleep(ms(25)).await;
        drop(timer);
        let after_drop = count.load(Ordering::SeqCst);
        tokio::time::sleep(ms(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_drop);
    }
}
