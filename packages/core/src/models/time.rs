//! Time Provider Abstraction
//!
//! Provides a trait-based abstraction for the clock used by the hierarchy
//! engine, plus the fixed-width timestamp encoding used in the database.
//!
//! Timestamps are persisted as `YYYY-MM-DDTHH:MM:SS.ffffffZ`. Every value has
//! the same width, so SQL string comparison orders them chronologically and
//! the "only move forward" touch can be a single `UPDATE … WHERE modified_at < ?`.
//!
//! # Examples
//!
//! ```rust
//! use synergia_core::models::time::{TimeProvider, SystemTimeProvider};
//! use chrono::Utc;
//!
//! let provider = SystemTimeProvider;
//! let now = provider.now();
//! assert!(now <= Utc::now());
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Trait for providing current time
pub trait TimeProvider: Send + Sync {
    /// Get the current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// System time provider using actual system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock
///
/// Lets callers pin the time the engine stamps on mutations, e.g. to replay
/// an import with its original dates or to write deterministic tests.
///
/// ```rust
/// use synergia_core::models::time::{ManualTimeProvider, TimeProvider};
/// use chrono::{Duration, TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
/// let clock = ManualTimeProvider::with_time(start);
/// clock.advance(Duration::hours(1));
/// assert_eq!(clock.now() - start, Duration::hours(1));
/// ```
#[derive(Debug)]
pub struct ManualTimeProvider {
    current_time: Mutex<DateTime<Utc>>,
}

impl ManualTimeProvider {
    /// Start the clock at a specific time
    pub fn with_time(time: DateTime<Utc>) -> Self {
        Self {
            current_time: Mutex::new(time),
        }
    }

    /// Jump to a specific time (may go backwards)
    pub fn set(&self, time: DateTime<Utc>) {
        *self.lock() = time;
    }

    /// Advance the clock by a duration
    pub fn advance(&self, duration: chrono::Duration) {
        let mut current = self.lock();
        *current += duration;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid timestamp
        self.current_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Encode a timestamp in the fixed-width database format
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

/// Decode a timestamp stored by [`format_timestamp`]
///
/// Also accepts plain SQLite `CURRENT_TIMESTAMP` text (`YYYY-MM-DD HH:MM:SS`)
/// and RFC3339 for rows written by hand.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_timestamp_format_is_fixed_width_and_ordered() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let late = early + Duration::microseconds(1);

        let a = format_timestamp(&early);
        let b = format_timestamp(&late);

        assert_eq!(a.len(), b.len());
        assert!(a < b, "string order must follow time order");
        assert_eq!(a, "2024-01-01T09:00:00.000000Z");
    }

    #[test]
    fn test_timestamp_roundtrip_keeps_microseconds() {
        let t = Utc.with_ymd_and_hms(2023, 6, 30, 23, 59, 59).unwrap() + Duration::microseconds(42);
        assert_eq!(parse_timestamp(&format_timestamp(&t)), Some(t));
    }

    #[test]
    fn test_parse_accepts_sqlite_and_rfc3339() {
        let expected = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(parse_timestamp("2024-02-03 04:05:06"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-03T04:05:06Z"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualTimeProvider::with_time(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now(), start + Duration::minutes(5));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
