//! Clock
//!
//! Every time-dependent rule (deadlines, buffer lockout, yield accrual, streaks)
//! reads time through [`Clock`] so tests can drive it explicitly.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
///
/// Only moves forward; `set` to an earlier instant is a bug.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self.current.lock();
        debug_assert!(
            time >= *current,
            "ManualClock: cannot go backward from {} to {}",
            *current,
            time
        );
        *current = time;
    }

    pub fn advance(&self, delta: Duration) {
        debug_assert!(delta >= Duration::zero(), "ManualClock: delta must be non-negative");
        *self.current.lock() += delta;
    }

    pub fn advance_days(&self, days: i64) {
        self.advance(Duration::days(days));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Whole days between two instants, floored, never negative.
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days().max(0)
}
