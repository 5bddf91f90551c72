//! Periodic save of an arbitrary item.
//!
//! [`Autosave`] drives a save delegate on an [`EngineTimer`] using the
//! awaited callback style, so a slow save delays the next one instead of
//! overlapping it. A frequency of zero minutes disables autosaving.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::timer::{EngineTimer, Schedule, TickResult, TimerError};

/// Real seconds in one autosave minute.
const SECS_PER_MINUTE: u64 = 60;

type SaveDelegate<T> = Arc<dyn Fn(Arc<T>) -> BoxFuture<'static, TickResult> + Send + Sync>;

/// Runs a save delegate for an item every few minutes.
pub struct Autosave<T> {
    timer: EngineTimer<T>,
    save: SaveDelegate<T>,
    frequency_minutes: u32,
}

impl<T> core::fmt::Debug for Autosave<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Autosave")
            .field("timer", &self.timer)
            .field("frequency_minutes", &self.frequency_minutes)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Autosave<T> {
    /// Create a disabled autosave for `item`.
    pub fn new<F, Fut>(item: T, save: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TickResult> + Send + 'static,
    {
        Self {
            timer: EngineTimer::new("autosave", item),
            save: Arc::new(move |item| save(item).boxed()),
            frequency_minutes: 0,
        }
    }

    /// Set how many minutes pass between saves (0 disables).
    #[must_use]
    pub fn with_frequency_minutes(mut self, minutes: u32) -> Self {
        self.frequency_minutes = minutes;
        self
    }

    /// Change the frequency. Takes effect on the next
    /// [`initialize`](Self::initialize).
    pub fn set_frequency_minutes(&mut self, minutes: u32) {
        self.frequency_minutes = minutes;
    }

    /// Return the configured frequency in minutes.
    pub const fn frequency_minutes(&self) -> u32 {
        self.frequency_minutes
    }

    /// Return the real time between saves, or `None` when disabled.
    pub fn interval(&self) -> Option<Duration> {
        (self.frequency_minutes > 0).then(|| {
            Duration::from_secs(u64::from(self.frequency_minutes).saturating_mul(SECS_PER_MINUTE))
        })
    }

    /// Return the item being saved.
    pub const fn item(&self) -> &Arc<T> {
        self.timer.state()
    }

    /// Whether saves are scheduled.
    pub fn is_running(&self) -> bool {
        self.timer.is_running()
    }

    /// Start saving every interval. The first save happens one interval
    /// after this call.
    ///
    /// Returns `false` without scheduling anything when the frequency is
    /// zero.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError`] if the timer can not start.
    pub fn initialize(&self) -> Result<bool, TimerError> {
        let Some(interval) = self.interval() else {
            debug!("autosave disabled");
            return Ok(false);
        };

        let save = Arc::clone(&self.save);
        self.timer
            .start_async(Schedule::repeating(interval), move |item, _| save(item))?;
        info!(frequency_minutes = self.frequency_minutes, "autosave started");
        Ok(true)
    }

    /// Stop saving. A save already in progress completes.
    pub fn delete(&self) {
        self.timer.stop();
    }

    /// Stop saving and wait for a save in progress to complete.
    pub async fn shutdown(&self) {
        self.timer.shutdown().await;
    }
}
