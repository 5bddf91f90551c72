//! Resolution of the active period for a clock reading.
//!
//! Period start times are points on a circular day. The active period
//! for a query is the one whose start is the latest point at or before the
//! query; a query earlier than every start belongs to the period with the
//! greatest start, which began the previous day and is still in effect.
//!
//! # Design Principles
//!
//! - The resolver holds an ordered view of the periods and nothing else.
//!   It is rebuilt whenever the period set changes.
//! - Duplicate start times are rejected at construction, so resolution
//!   never needs a tie-break.
//! - Resolution is a binary search over the ordered view.

use std::sync::Arc;

use chrono::Timelike;
use realmclock_types::{TimeError, TimeOfDay};

use crate::period::Period;

/// Errors raised when building a resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// Two periods share a start time.
    #[error("period {name} starts at {start_time}, already taken by {existing}")]
    DuplicatePeriod {
        /// Name of the rejected period.
        name: String,
        /// Name of the period already holding the start time.
        existing: String,
        /// The contested start time.
        start_time: TimeOfDay,
    },
}

/// Ordered view of a period set.
#[derive(Debug, Clone, Default)]
pub struct PeriodResolver {
    /// Periods sorted by start hour, then start minute.
    ordered: Vec<Arc<Period>>,
}

impl PeriodResolver {
    /// Build a resolver over `periods`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::DuplicatePeriod`] if two periods start at
    /// the same hour and minute.
    pub fn new<I>(periods: I) -> Result<Self, ResolverError>
    where
        I: IntoIterator<Item = Arc<Period>>,
    {
        let mut ordered: Vec<Arc<Period>> = periods.into_iter().collect();
        ordered.sort_by_key(|period| period.start_time());

        let duplicate = ordered.windows(2).find_map(|pair| match pair {
            [existing, rejected] if existing.start_time() == rejected.start_time() => {
                Some((existing, rejected))
            }
            _ => None,
        });
        if let Some((existing, rejected)) = duplicate {
            return Err(ResolverError::DuplicatePeriod {
                name: rejected.name().to_owned(),
                existing: existing.name().to_owned(),
                start_time: rejected.start_time(),
            });
        }

        Ok(Self { ordered })
    }

    /// Return the periods in start-time order.
    pub fn periods(&self) -> &[Arc<Period>] {
        &self.ordered
    }

    /// Return the period with the earliest start time.
    pub fn first(&self) -> Option<&Arc<Period>> {
        self.ordered.first()
    }

    /// Return the number of periods.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the resolver holds no periods.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Return the period active at `query`.
    ///
    /// `None` only when the resolver is empty.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use realmclock_core::period::Period;
    /// use realmclock_core::resolver::PeriodResolver;
    /// use realmclock_types::TimeOfDay;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let resolver = PeriodResolver::new([
    ///     Arc::new(Period::new("Day", TimeOfDay::standard(6, 0)?)?),
    ///     Arc::new(Period::new("Night", TimeOfDay::standard(20, 0)?)?),
    /// ])?;
    /// let early = TimeOfDay::standard(3, 0)?;
    /// assert_eq!(resolver.resolve(&early).map(|p| p.name()), Some("Night"));
    /// # Ok(())
    /// # }
    /// ```
    pub fn resolve(&self, query: &TimeOfDay) -> Option<&Arc<Period>> {
        let started = self
            .ordered
            .partition_point(|period| period.start_time() <= *query);
        match started.checked_sub(1) {
            Some(index) => self.ordered.get(index),
            None => self.ordered.last(),
        }
    }

    /// Return the next period to start strictly after `query`, wrapping to
    /// the earliest period past the end of the day.
    pub fn upcoming(&self, query: &TimeOfDay) -> Option<&Arc<Period>> {
        let started = self
            .ordered
            .partition_point(|period| period.start_time() <= *query);
        self.ordered.get(started).or_else(|| self.ordered.first())
    }

    /// Return the period active at a wall-clock reading mapped onto a day
    /// of `hours_per_day` hours.
    ///
    /// # Errors
    ///
    /// Returns [`TimeError::InvalidTimeOfDay`] if `hours_per_day` is zero.
    pub fn resolve_wall_clock<T: Timelike>(
        &self,
        now: &T,
        hours_per_day: u32,
    ) -> Result<Option<&Arc<Period>>, TimeError> {
        let query = TimeOfDay::from_wall_clock(now, hours_per_day)?;
        Ok(self.resolve(&query))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveTime;

    use super::*;

    fn period(name: &str, hour: u32, minute: u32) -> Arc<Period> {
        Arc::new(Period::new(name, TimeOfDay::standard(hour, minute).unwrap()).unwrap())
    }

    fn day() -> PeriodResolver {
        // Deliberately out of order.
        PeriodResolver::new([
            period("Evening", 18, 0),
            period("Morning", 5, 30),
            period("LaterAfternoon", 15, 0),
            period("Afternoon", 12, 0),
        ])
        .unwrap()
    }

    fn resolve_name(resolver: &PeriodResolver, hour: u32, minute: u32) -> Option<String> {
        resolver
            .resolve(&TimeOfDay::standard(hour, minute).unwrap())
            .map(|p| p.name().to_owned())
    }

    #[test]
    fn periods_are_ordered_by_start_time() {
        let resolver = day();
        let names: Vec<&str> = resolver.periods().iter().map(|p| p.name()).collect();
        assert_eq!(names, ["Morning", "Afternoon", "LaterAfternoon", "Evening"]);
        assert_eq!(resolver.first().map(|p| p.name()), Some("Morning"));
        assert_eq!(resolver.len(), 4);
    }

    #[test]
    fn resolves_the_latest_started_period() {
        let resolver = day();
        assert_eq!(resolve_name(&resolver, 6, 0).as_deref(), Some("Morning"));
        assert_eq!(resolve_name(&resolver, 12, 0).as_deref(), Some("Afternoon"));
        assert_eq!(resolve_name(&resolver, 16, 0).as_deref(), Some("LaterAfternoon"));
        assert_eq!(resolve_name(&resolver, 18, 0).as_deref(), Some("Evening"));
        assert_eq!(resolve_name(&resolver, 23, 59).as_deref(), Some("Evening"));
    }

    #[test]
    fn query_before_every_start_wraps_to_previous_day() {
        let resolver = day();
        assert_eq!(resolve_name(&resolver, 2, 0).as_deref(), Some("Evening"));
        assert_eq!(resolve_name(&resolver, 5, 29).as_deref(), Some("Evening"));
        assert_eq!(resolve_name(&resolver, 5, 30).as_deref(), Some("Morning"));
    }

    #[test]
    fn minute_boundaries_never_resolve_to_nothing() {
        // An earlier hour whose minute equals a later start minute.
        let resolver = day();
        assert_eq!(resolve_name(&resolver, 11, 30).as_deref(), Some("Morning"));
        assert_eq!(resolve_name(&resolver, 14, 0).as_deref(), Some("Afternoon"));
        assert_eq!(resolve_name(&resolver, 0, 0).as_deref(), Some("Evening"));
    }

    #[test]
    fn upcoming_wraps_around_the_day() {
        let resolver = day();
        let next = |h, m| {
            resolver
                .upcoming(&TimeOfDay::standard(h, m).unwrap())
                .map(|p| p.name().to_owned())
        };
        assert_eq!(next(6, 0).as_deref(), Some("Afternoon"));
        assert_eq!(next(12, 0).as_deref(), Some("LaterAfternoon"));
        assert_eq!(next(19, 0).as_deref(), Some("Morning"));
        assert_eq!(next(1, 0).as_deref(), Some("Morning"));
    }

    #[test]
    fn single_period_is_always_active() {
        let resolver = PeriodResolver::new([period("Always", 9, 0)]).unwrap();
        assert_eq!(resolve_name(&resolver, 3, 0).as_deref(), Some("Always"));
        assert_eq!(resolve_name(&resolver, 9, 0).as_deref(), Some("Always"));
        assert_eq!(resolve_name(&resolver, 22, 0).as_deref(), Some("Always"));
    }

    #[test]
    fn empty_resolver_resolves_nothing() {
        let resolver = PeriodResolver::new(Vec::new()).unwrap();
        assert!(resolver.is_empty());
        assert!(resolver.resolve(&TimeOfDay::default()).is_none());
        assert!(resolver.upcoming(&TimeOfDay::default()).is_none());
        assert!(resolver.first().is_none());
    }

    #[test]
    fn duplicate_start_times_are_rejected() {
        let err = PeriodResolver::new([
            period("Dawn", 6, 0),
            period("Noon", 12, 0),
            period("Sunrise", 6, 0),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ResolverError::DuplicatePeriod { ref start_time, .. }
                if *start_time == TimeOfDay::standard(6, 0).unwrap()
        ));
    }

    #[test]
    fn wall_clock_is_mapped_onto_the_day() {
        let resolver = day();
        let now = NaiveTime::from_hms_opt(16, 45, 0).unwrap();
        let active = resolver.resolve_wall_clock(&now, 24).unwrap();
        assert_eq!(active.map(|p| p.name()), Some("LaterAfternoon"));
        assert!(resolver.resolve_wall_clock(&now, 0).is_err());
    }
}
