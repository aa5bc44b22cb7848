//! Wall-clock source shared by the cache, prefetcher and mutation manager.
//!
//! Components never call `Utc::now()` directly; they take a `Clock` so tests
//! can drive TTLs and hour-of-day buckets deterministically.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, Local, Offset, TimeZone, Timelike, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Offset used to derive local hour and weekday for access events.
    fn utc_offset(&self) -> FixedOffset {
        Utc.fix()
    }

    /// Local hour of day (0-23) and weekday (0 = Monday) for `now()`.
    fn local_hour_and_weekday(&self) -> (u8, u8) {
        let local = self.now().with_timezone(&self.utc_offset());
        (local.hour() as u8, local.weekday().num_days_from_monday() as u8)
    }
}

/// Milliseconds elapsed between two instants, clamped at zero.
pub fn elapsed_between(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

/// Real system clock using the host's local offset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn utc_offset(&self) -> FixedOffset {
        Local::now().offset().fix()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Start at a fixed, reproducible instant (Monday 2024-01-01 09:00 UTC).
    pub fn fixed() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn advance(&self, by: Duration) {
        let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock();
        *now += step;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::fixed();
        let start = clock.now();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(elapsed_between(start, clock.now()), Duration::from_millis(1500));
    }

    #[test]
    fn fixed_clock_is_monday_morning() {
        let clock = ManualClock::fixed();
        assert_eq!(clock.local_hour_and_weekday(), (9, 0));
    }

    #[test]
    fn elapsed_never_negative() {
        let clock = ManualClock::fixed();
        let later = clock.now() + chrono::Duration::seconds(5);
        assert_eq!(elapsed_between(later, clock.now()), Duration::ZERO);
    }
}
