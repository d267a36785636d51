//! Wall-clock and calendar-day source.
//!
//! Cache entries and run records are keyed by the local calendar day, so
//! every component asks a [`Clock`] for "today" instead of reading the system
//! time directly.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, Offset, Utc};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// Source of the current instant and the local calendar day.
pub trait Clock: Send + Sync + Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the calendar day the current instant falls on, in local time.
    fn today(&self) -> NaiveDate;
}

/// Real system clock.
///
/// Without an explicit offset the host's local time zone decides the day,
/// daylight saving included. A fixed offset never shifts with the seasons:
/// for a zone that observes DST, run the host in that zone and leave the
/// offset unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    /// Creates a clock using the host time zone.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock pinned to a fixed UTC offset in minutes, applied
    /// all year round.
    ///
    /// Returns `None` if the offset is out of range (more than a day).
    #[must_use]
    pub fn with_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self {
            offset: Some(offset),
        })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset).date_naive(),
            None => Local::now().date_naive(),
        }
    }
}

/// Controllable clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
    offset: FixedOffset,
}

impl ManualClock {
    /// Creates a clock frozen at `start`, reporting days in UTC.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
            offset: Utc.fix(),
        }
    }

    /// Creates a clock frozen at noon UTC on the given day.
    #[must_use]
    pub fn at_date(date: NaiveDate) -> Self {
        let noon = date
            .and_hms_opt(12, 0, 0)
            .map_or_else(Utc::now, |dt| dt.and_utc());
        Self::new(noon)
    }

    /// Sets the offset used to derive the calendar day.
    #[must_use]
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Moves the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock() = instant;
    }

    /// Advances the clock.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    /// Advances the clock by whole days.
    pub fn advance_days(&self, days: i64) {
        self.advance(Duration::days(days));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }

    fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.offset).date_naive()
    }
}
