//! In-game clock readings on a circular day.
//!
//! A [`TimeOfDay`] is an hour/minute reading bounded by a configurable
//! day length. All arithmetic treats the day as a circle of
//! `hours_per_day * 60` minutes: a reading and a delta are flattened into
//! "minutes since midnight", combined, reduced modulo the day length
//! (negative results wrap back into range), and split back into
//! hour/minute.
//!
//! # Invariants
//!
//! - `hours_per_day` is never zero. Construction and deserialization
//!   reject it with [`TimeError::InvalidTimeOfDay`].
//! - `hour < hours_per_day` and `minute < 60`.
//! - Identity (equality, ordering, hashing) is `(hour, minute)` only; the
//!   day length is not part of it.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

use chrono::Timelike;
use serde::{Deserialize, Serialize};

/// Day length used when none is specified.
pub const DEFAULT_HOURS_PER_DAY: u32 = 24;

/// Minutes in one in-game hour. Only the number of hours in a day is
/// configurable.
pub const MINUTES_PER_HOUR: u32 = 60;

/// Errors raised when a clock reading is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    /// The reading or its day length is not well formed.
    #[error(
        "invalid time of day {hour:02}:{minute:02} with {hours_per_day} hours per day: {reason}"
    )]
    InvalidTimeOfDay {
        /// Offending hour.
        hour: u32,
        /// Offending minute.
        minute: u32,
        /// Offending day length.
        hours_per_day: u32,
        /// Explanation of what is wrong with the value.
        reason: String,
    },
}

/// An hour/minute reading within a day of `hours_per_day` hours.
///
/// `TimeOfDay` is `Copy`: every hand-off between owners is a copy, so a
/// reading is never shared in mutable form. The mutating helpers return
/// `&mut Self` so adjustments can be chained:
///
/// ```
/// use realmclock_types::TimeOfDay;
///
/// let mut time = TimeOfDay::standard(23, 59).unwrap();
/// time.increment_by_minute(2);
/// assert_eq!((time.hour(), time.minute()), (0, 1));
/// time.decrement_by_minute(2);
/// assert_eq!((time.hour(), time.minute()), (23, 59));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "RawTimeOfDay")]
pub struct TimeOfDay {
    /// Hour of the day, `0..hours_per_day`.
    hour: u32,

    /// Minute of the hour, `0..60`.
    minute: u32,

    /// Length of the day this reading lives on.
    hours_per_day: u32,
}

/// Unvalidated wire shape; converted through [`TimeOfDay::new`].
#[derive(Deserialize)]
struct RawTimeOfDay {
    hour: u32,
    minute: u32,
    #[serde(default = "default_hours_per_day")]
    hours_per_day: u32,
}

impl TryFrom<RawTimeOfDay> for TimeOfDay {
    type Error = TimeError;

    fn try_from(raw: RawTimeOfDay) -> Result<Self, Self::Error> {
        Self::new(raw.hour, raw.minute, raw.hours_per_day)
    }
}

const fn default_hours_per_day() -> u32 {
    DEFAULT_HOURS_PER_DAY
}

impl TimeOfDay {
    /// Create a reading on a day of `hours_per_day` hours.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidTimeOfDay`] if `hours_per_day` is zero,
    /// `hour` is not below `hours_per_day`, or `minute` is not below 60.
    pub fn new(hour: u32, minute: u32, hours_per_day: u32) -> Result<Self, TimeError> {
        let invalid = |reason: &str| TimeError::InvalidTimeOfDay {
            hour,
            minute,
            hours_per_day,
            reason: reason.to_owned(),
        };

        if hours_per_day == 0 {
            return Err(invalid("hours per day can not be zero"));
        }
        if hour >= hours_per_day {
            return Err(invalid("hour must be less than hours per day"));
        }
        if minute >= MINUTES_PER_HOUR {
            return Err(invalid("minute must be less than 60"));
        }

        Ok(Self {
            hour,
            minute,
            hours_per_day,
        })
    }

    /// Create a reading on a standard 24-hour day.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidTimeOfDay`] if `hour >= 24` or
    /// `minute >= 60`.
    pub fn standard(hour: u32, minute: u32) -> Result<Self, TimeError> {
        Self::new(hour, minute, DEFAULT_HOURS_PER_DAY)
    }

    /// Midnight (00:00) on a day of `hours_per_day` hours.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidTimeOfDay`] if `hours_per_day` is zero.
    pub fn midnight(hours_per_day: u32) -> Result<Self, TimeError> {
        Self::new(0, 0, hours_per_day)
    }

    /// Map a wall-clock reading onto a day of `hours_per_day` hours.
    ///
    /// Hours beyond the in-game day length wrap around; minutes are kept.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidTimeOfDay`] if `hours_per_day` is zero.
    pub fn from_wall_clock<T: Timelike>(now: &T, hours_per_day: u32) -> Result<Self, TimeError> {
        let hour = now
            .hour()
            .checked_rem(hours_per_day)
            .ok_or_else(|| TimeError::InvalidTimeOfDay {
                hour: now.hour(),
                minute: now.minute(),
                hours_per_day,
                reason: "hours per day can not be zero".to_owned(),
            })?;
        Self::new(hour, now.minute(), hours_per_day)
    }

    /// Return the hour of the day.
    pub const fn hour(&self) -> u32 {
        self.hour
    }

    /// Return the minute of the hour.
    pub const fn minute(&self) -> u32 {
        self.minute
    }

    /// Return the number of hours in this reading's day.
    pub const fn hours_per_day(&self) -> u32 {
        self.hours_per_day
    }

    /// Return the number of minutes in one full day.
    pub fn minutes_per_day(&self) -> u64 {
        u64::from(self.hours_per_day).saturating_mul(u64::from(MINUTES_PER_HOUR))
    }

    /// Return the number of minutes elapsed since midnight.
    pub fn minutes_since_midnight(&self) -> u64 {
        u64::from(self.hour)
            .saturating_mul(u64::from(MINUTES_PER_HOUR))
            .saturating_add(u64::from(self.minute))
    }

    /// Return the same hour/minute on a day of `hours_per_day` hours.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidTimeOfDay`] if the new day length is
    /// zero or too short to contain this reading's hour.
    pub fn with_hours_per_day(self, hours_per_day: u32) -> Result<Self, TimeError> {
        Self::new(self.hour, self.minute, hours_per_day)
    }

    /// Advance by `minutes`, wrapping past the end of the day.
    pub fn increment_by_minute(&mut self, minutes: u32) -> &mut Self {
        self.shift_minutes(i64::from(minutes));
        self
    }

    /// Rewind by `minutes`, wrapping before the start of the day.
    pub fn decrement_by_minute(&mut self, minutes: u32) -> &mut Self {
        self.shift_minutes(i64::from(minutes).saturating_neg());
        self
    }

    /// Advance by `hours`, wrapping past the end of the day.
    pub fn increment_by_hour(&mut self, hours: u32) -> &mut Self {
        self.shift_minutes(hours_to_minutes(hours));
        self
    }

    /// Rewind by `hours`, wrapping before the start of the day.
    pub fn decrement_by_hour(&mut self, hours: u32) -> &mut Self {
        self.shift_minutes(hours_to_minutes(hours).saturating_neg());
        self
    }

    /// Return this reading advanced by the hour and minute of `offset`.
    ///
    /// The result keeps this reading's day length; `offset` only
    /// contributes its hour/minute distance.
    #[must_use]
    pub fn offset_by(&self, offset: &Self) -> Self {
        let mut adjusted = *self;
        adjusted.shift_minutes(
            hours_to_minutes(offset.hour).saturating_add(i64::from(offset.minute)),
        );
        adjusted
    }

    /// Move the reading by a signed number of minutes around the day.
    fn shift_minutes(&mut self, delta: i64) {
        let day = i64::from(self.hours_per_day).saturating_mul(i64::from(MINUTES_PER_HOUR));
        // Reducing the delta first keeps the sum below two day lengths.
        // `day` is positive by construction, so neither call can panic.
        let reduced = delta.rem_euclid(day);
        let current = i64::from(self.hour)
            .saturating_mul(i64::from(MINUTES_PER_HOUR))
            .saturating_add(i64::from(self.minute));
        let total = current.saturating_add(reduced).rem_euclid(day);

        let per_hour = i64::from(MINUTES_PER_HOUR);
        self.hour = u32::try_from(total.div_euclid(per_hour)).unwrap_or(0);
        self.minute = u32::try_from(total.rem_euclid(per_hour)).unwrap_or(0);
    }
}

fn hours_to_minutes(hours: u32) -> i64 {
    i64::from(hours).saturating_mul(i64::from(MINUTES_PER_HOUR))
}

impl Default for TimeOfDay {
    /// Midnight on a standard 24-hour day.
    fn default() -> Self {
        Self {
            hour: 0,
            minute: 0,
            hours_per_day: DEFAULT_HOURS_PER_DAY,
        }
    }
}

impl PartialEq for TimeOfDay {
    fn eq(&self, other: &Self) -> bool {
        self.hour == other.hour && self.minute == other.minute
    }
}

impl Eq for TimeOfDay {}

impl Hash for TimeOfDay {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hour.hash(state);
        self.minute.hash(state);
    }
}

impl PartialOrd for TimeOfDay {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeOfDay {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hour
            .cmp(&other.hour)
            .then_with(|| self.minute.cmp(&other.minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use chrono::NaiveTime;

    use super::*;

    fn time(hour: u32, minute: u32) -> TimeOfDay {
        TimeOfDay::standard(hour, minute).unwrap()
    }

    #[test]
    fn zero_hours_per_day_is_rejected() {
        let result = TimeOfDay::new(0, 0, 0);
        assert!(matches!(
            result,
            Err(TimeError::InvalidTimeOfDay {
                hours_per_day: 0,
                ..
            })
        ));
        assert!(TimeOfDay::midnight(0).is_err());
    }

    #[test]
    fn out_of_range_components_are_rejected() {
        assert!(TimeOfDay::new(24, 0, 24).is_err());
        assert!(TimeOfDay::new(10, 60, 24).is_err());
        assert!(TimeOfDay::new(9, 59, 10).is_ok());
    }

    #[test]
    fn increment_wraps_past_midnight() {
        let mut t = time(23, 59);
        t.increment_by_minute(2);
        assert_eq!(t, time(0, 1));
    }

    #[test]
    fn decrement_wraps_before_midnight() {
        let mut t = time(0, 1);
        t.decrement_by_minute(2);
        assert_eq!(t, time(23, 59));
    }

    #[test]
    fn minute_roundtrip_is_identity() {
        for n in [0, 1, 59, 60, 61, 1439, 1440, 1441, 10_000, u32::MAX] {
            let original = time(23, 59);
            let mut t = original;
            t.increment_by_minute(n).decrement_by_minute(n);
            assert_eq!(t, original, "roundtrip failed for n = {n}");
        }
    }

    #[test]
    fn full_day_of_minutes_is_identity() {
        for hours_per_day in [1, 10, 24, 36] {
            let original = TimeOfDay::new(hours_per_day - 1, 17, hours_per_day).unwrap();
            let mut t = original;
            t.increment_by_minute(hours_per_day * MINUTES_PER_HOUR);
            assert_eq!(t, original, "day length {hours_per_day}");
        }
    }

    #[test]
    fn hour_arithmetic_wraps() {
        let mut t = time(22, 30);
        t.increment_by_hour(3);
        assert_eq!(t, time(1, 30));
        t.decrement_by_hour(5);
        assert_eq!(t, time(20, 30));
        t.increment_by_hour(48);
        assert_eq!(t, time(20, 30));
    }

    #[test]
    fn short_day_wraps_at_its_own_length() {
        let mut t = TimeOfDay::new(9, 45, 10).unwrap();
        t.increment_by_minute(30);
        assert_eq!((t.hour(), t.minute()), (0, 15));
        assert_eq!(t.hours_per_day(), 10);
    }

    #[test]
    fn offset_adds_hours_and_minutes() {
        let world = time(22, 50);
        let offset = time(3, 20);
        assert_eq!(world.offset_by(&offset), time(2, 10));
        // The original reading is untouched.
        assert_eq!(world, time(22, 50));
    }

    #[test]
    fn identity_ignores_day_length() {
        let a = TimeOfDay::new(5, 30, 24).unwrap();
        let b = TimeOfDay::new(5, 30, 30).unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn ordering_is_hour_then_minute() {
        assert!(time(5, 59) < time(6, 0));
        assert!(time(12, 0) > time(11, 59));
        assert!(time(12, 1) > time(12, 0));
    }

    #[test]
    fn display_is_zero_padded() {
        assert_eq!(time(5, 3).to_string(), "05:03");
        assert_eq!(time(18, 45).to_string(), "18:45");
    }

    #[test]
    fn wall_clock_hours_wrap_onto_short_days() {
        let now = NaiveTime::from_hms_opt(14, 25, 0).unwrap();
        let t = TimeOfDay::from_wall_clock(&now, 10).unwrap();
        assert_eq!((t.hour(), t.minute()), (4, 25));
        assert!(TimeOfDay::from_wall_clock(&now, 0).is_err());
    }

    #[test]
    fn rehoming_checks_the_new_day_length() {
        let t = time(20, 0);
        assert!(t.with_hours_per_day(30).is_ok());
        assert!(t.with_hours_per_day(12).is_err());
    }

    #[test]
    fn deserialization_validates() {
        let ok: TimeOfDay = serde_json::from_str(r#"{"hour":5,"minute":30}"#).unwrap();
        assert_eq!(ok, time(5, 30));
        assert_eq!(ok.hours_per_day(), DEFAULT_HOURS_PER_DAY);

        let zero = serde_json::from_str::<TimeOfDay>(r#"{"hour":0,"minute":0,"hours_per_day":0}"#);
        assert!(zero.is_err());
    }
}
