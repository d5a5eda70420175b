//! Time window used to narrow the visible sample range.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A half-open `[start, end)` range of epoch milliseconds.
///
/// A missing bound is unbounded, so the default window covers all time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    start: Option<i64>,
    end: Option<i64>,
}

impl TimeWindow {
    /// The unbounded window.
    pub const ALL_TIME: Self = Self {
        start: None,
        end: None,
    };

    /// Create a window from optional bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] when both bounds are present and
    /// `start > end`.
    pub fn new(start: Option<i64>, end: Option<i64>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(Error::InvalidParameter {
                    name: "time_window".to_string(),
                    value: format!("start {} is after end {}", s, e),
                });
            }
        }

        Ok(Self { start, end })
    }

    /// Create a bounded window.
    pub fn between(start: i64, end: i64) -> Result<Self> {
        Self::new(Some(start), Some(end))
    }

    /// Create a bounded window from datetimes.
    pub fn between_datetimes(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        Self::between(start.timestamp_millis(), end.timestamp_millis())
    }

    /// Everything at or after `start`.
    pub fn since(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Everything before `end`.
    pub fn until(end: i64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    /// Inclusive lower bound, if any.
    pub fn start(&self) -> Option<i64> {
        self.start
    }

    /// Exclusive upper bound, if any.
    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Replace the lower bound, keeping the upper one.
    pub fn with_start(self, start: Option<i64>) -> Result<Self> {
        Self::new(start, self.end)
    }

    /// Replace the upper bound, keeping the lower one.
    pub fn with_end(self, end: Option<i64>) -> Result<Self> {
        Self::new(self.start, end)
    }

    /// Whether this window places no restriction on timestamps.
    pub fn is_all_time(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }

    /// Whether `timestamp` falls inside the window.
    #[inline]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start.map_or(true, |s| s <= timestamp) && self.end.map_or(true, |e| timestamp < e)
    }

    /// Whether every timestamp in `self` is also in `other`.
    pub fn is_within(&self, other: &TimeWindow) -> bool {
        let start_ok = match (other.start, self.start) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(o), Some(s)) => o <= s,
        };
        let end_ok = match (other.end, self.end) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(o), Some(e)) => e <= o,
        };
        start_ok && end_ok
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.start {
            Some(s) => write!(f, "[{}", s)?,
            None => write!(f, "(-inf")?,
        }
        match self.end {
            Some(e) => write!(f, ", {})", e),
            None => write!(f, ", +inf)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_all_time() {
        let window = TimeWindow::default();
        assert!(window.is_all_time());
        assert_eq!(window, TimeWindow::ALL_TIME);
        assert!(window.contains(i64::MIN));
        assert!(window.contains(i64::MAX));
    }

    #[test]
    fn test_half_open_bounds() {
        let window = TimeWindow::between(100, 200).unwrap();
        assert!(!window.contains(99));
        assert!(window.contains(100));
        assert!(window.contains(199));
        assert!(!window.contains(200));
    }

    #[test]
    fn test_empty_window_allowed() {
        let window = TimeWindow::between(100, 100).unwrap();
        assert!(!window.contains(100));
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        assert!(matches!(
            TimeWindow::between(200, 100),
            Err(Error::InvalidParameter { .. })
        ));
        let window = TimeWindow::since(500);
        assert!(window.with_end(Some(400)).is_err());
        assert!(window.with_end(Some(600)).is_ok());
    }

    #[test]
    fn test_is_within() {
        let narrow = TimeWindow::between(150, 180).unwrap();
        let wide = TimeWindow::between(100, 200).unwrap();
        assert!(narrow.is_within(&wide));
        assert!(!wide.is_within(&narrow));
        assert!(wide.is_within(&TimeWindow::ALL_TIME));
        assert!(!TimeWindow::since(150).is_within(&wide));
    }

    #[test]
    fn test_display() {
        assert_eq!(TimeWindow::ALL_TIME.to_string(), "(-inf, +inf)");
        assert_eq!(TimeWindow::between(1, 2).unwrap().to_string(), "[1, 2)");
    }
}
