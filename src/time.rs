//! Time sources and minute-of-day windows.
//!
//! Dialogues may be restricted to a daily activity window expressed in
//! minutes since local midnight. Windows wrap around midnight, and a window
//! whose start equals its end is always active.
//!
//! Every deferred effect in the engine (history expiry, throttle
//! restoration, loop debounce) is evaluated against a [`Clock`], so tests
//! can drive time explicitly.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Number of minutes in a day.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Minute of day of `at` in the timezone `utc_offset_minutes` east of UTC.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn minute_of_day(at: DateTime<Utc>, utc_offset_minutes: i32) -> u16 {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)
        .unwrap_or_else(|| Utc.fix());
    let local = at.with_timezone(&offset);
    // hour < 24 and minute < 60, so the result always fits.
    (local.hour() * 60 + local.minute()) as u16
}

/// Daily activity window, half-open `[start, end)` in minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Start minute (inclusive).
    pub start: u16,
    /// End minute (exclusive).
    pub end: u16,
}

impl TimeWindow {
    /// Creates a window, validating both bounds.
    pub fn new(start: u16, end: u16) -> Result<Self, ValidationError> {
        check_minute(start)?;
        check_minute(end)?;
        Ok(Self { start, end })
    }

    /// The always-active window.
    #[must_use]
    pub const fn always() -> Self {
        Self { start: 0, end: 0 }
    }

    /// Returns true if the window covers the whole day.
    #[must_use]
    pub const fn is_always(&self) -> bool {
        self.start == self.end
    }

    /// Cyclic membership test.
    ///
    /// `(start < end) XOR (t >= start) XOR (t < end)` is true exactly when
    /// `t` lies in the window, for both plain and midnight-wrapping windows.
    #[must_use]
    pub const fn contains(&self, minute: u16) -> bool {
        if self.is_always() {
            return true;
        }
        (self.start < self.end) ^ (minute >= self.start) ^ (minute < self.end)
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", format_minute(self.start), format_minute(self.end))
    }
}

/// Validate a minute-of-day value.
pub fn check_minute(minute: u16) -> Result<u16, ValidationError> {
    if minute >= MINUTES_PER_DAY {
        return Err(ValidationError::MinuteOutOfRange { value: minute });
    }
    Ok(minute)
}

/// Parse `H:MM` / `HH:MM` (or a bare hour) into a minute of day.
pub fn parse_minute(input: &str) -> Result<u16, ValidationError> {
    let invalid = || ValidationError::InvalidConfig {
        reason: format!("invalid time of day '{input}'"),
    };
    let input = input.trim();
    let (hour, minute) = match input.split_once(':') {
        Some((h, m)) => (h, m),
        None => (input, "0"),
    };
    let hour: u16 = hour.parse().map_err(|_| invalid())?;
    let minute: u16 = minute.parse().map_err(|_| invalid())?;
    if hour > 24 || minute >= 60 || (hour == 24 && minute > 0) {
        return Err(invalid());
    }
    // 24:00 is midnight.
    Ok((hour * 60 + minute) % MINUTES_PER_DAY)
}

/// Render a minute of day as `HH:MM`.
#[must_use]
pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_plain_is_half_open() {
        let w = TimeWindow::new(8 * 60, 20 * 60).unwrap();
        assert!(!w.contains(8 * 60 - 1));
        assert!(w.contains(8 * 60));
        assert!(w.contains(19 * 60 + 59));
        assert!(!w.contains(20 * 60));
    }

    #[test]
    fn window_wraps_midnight() {
        let w = TimeWindow::new(22 * 60, 2 * 60).unwrap();
        assert!(w.contains(23 * 60));
        assert!(w.contains(0));
        assert!(w.contains(60));
        assert!(!w.contains(2 * 60));
        assert!(!w.contains(12 * 60));
        assert!(w.contains(22 * 60));
    }

    #[test]
    fn equal_bounds_mean_always() {
        let w = TimeWindow::new(300, 300).unwrap();
        assert!(w.is_always());
        for m in [0, 299, 300, 1439] {
            assert!(w.contains(m));
        }
    }

    #[test]
    fn minute_bounds_are_validated() {
        assert!(TimeWindow::new(0, MINUTES_PER_DAY).is_err());
        assert_eq!(
            check_minute(1500),
            Err(ValidationError::MinuteOutOfRange { value: 1500 })
        );
    }

    #[test]
    fn parse_and_format_minutes() {
        assert_eq!(parse_minute("8:30").unwrap(), 510);
        assert_eq!(parse_minute("23").unwrap(), 1380);
        assert_eq!(parse_minute("24:00").unwrap(), 0);
        assert!(parse_minute("25:00").is_err());
        assert!(parse_minute("ab").is_err());
        assert_eq!(format_minute(510), "08:30");
    }

    #[test]
    fn minute_of_day_applies_offset() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        assert_eq!(minute_of_day(at, 0), 23 * 60 + 30);
        assert_eq!(minute_of_day(at, 8 * 60), 7 * 60 + 30);
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }
}
