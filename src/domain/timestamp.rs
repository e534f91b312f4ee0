//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the next UTC midnight strictly after this timestamp.
    ///
    /// Daily rate-limit windows reset at this boundary, so the window is a
    /// fixed wall-clock day rather than a rolling 24 hours.
    pub fn next_utc_midnight(&self) -> Timestamp {
        let next_day = self.0.date_naive() + Duration::days(1);
        Self(next_day.and_time(NaiveTime::MIN).and_utc())
    }

    /// Whole seconds remaining until the next UTC midnight. Always >= 1.
    pub fn seconds_until_next_utc_midnight(&self) -> u64 {
        let remaining = self
            .next_utc_midnight()
            .0
            .signed_duration_since(self.0)
            .num_seconds();
        remaining.max(1) as u64
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ordering_follows_wall_clock() {
        let earlier = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap());
        let later = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
        assert!(earlier.is_before(&later));
        assert!(later.is_after(&earlier));
    }

    #[test]
    fn next_midnight_is_start_of_following_day() {
        let ts = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap());
        let midnight = ts.next_utc_midnight();
        assert_eq!(
            midnight.as_datetime(),
            &Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn seconds_until_midnight_matches_remaining_day() {
        let ts = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 3, 14, 23, 59, 0).unwrap());
        assert_eq!(ts.seconds_until_next_utc_midnight(), 60);
    }

    #[test]
    fn seconds_until_midnight_is_never_zero() {
        let ts = Timestamp::from_datetime(Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap());
        assert!(ts.seconds_until_next_utc_midnight() >= 1);
    }
}
