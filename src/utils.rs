//! Utility functions for the microbit-thermo crate.

use chrono::{DateTime, TimeZone, Utc};

/// Source of wall-clock time for sample timestamps.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Clock backed by the system's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Convert epoch milliseconds into a UTC datetime.
///
/// Returns `None` when the value is outside chrono's representable range.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use microbit_thermo::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(100.0);
/// assert!((fahrenheit - 212.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that returns whatever the test last set.
    #[derive(Debug, Default)]
    pub(crate) struct ManualClock(AtomicI64);

    impl ManualClock {
        pub(crate) fn at(millis: i64) -> Self {
            Self(AtomicI64::new(millis))
        }

        pub(crate) fn set(&self, millis: i64) {
            self.0.store(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((celsius_to_fahrenheit(37.0) - 98.6).abs() < 0.001);
    }

    #[test]
    fn test_millis_to_datetime() {
        let dt = millis_to_datetime(1_000).unwrap();
        assert_eq!(dt.timestamp(), 1);
        assert!(millis_to_datetime(i64::MAX).is_none());
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
