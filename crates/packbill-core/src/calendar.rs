//! Date arithmetic shared by the subscription model and the API responses.

use chrono::{DateTime, Datelike, Utc};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Whole days from `now` until `target`, rounded up.
///
/// A target 10 days and 1 second away is 11 days away; a target in the past
/// yields zero or a negative count.
#[must_use]
pub fn days_until(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    let millis = (target - now).num_milliseconds();
    if millis > 0 {
        (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY
    } else {
        millis / MILLIS_PER_DAY
    }
}

/// Like [`days_until`], clamped at zero.
#[must_use]
pub fn days_remaining(now: DateTime<Utc>, target: DateTime<Utc>) -> i64 {
    days_until(now, target).max(0)
}

/// Whether two instants fall in the same calendar month (UTC).
#[must_use]
pub fn same_month(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.year() == b.year() && a.month() == b.month()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn exact_days() {
        let now = Utc::now();
        assert_eq!(days_until(now, now + Duration::days(10)), 10);
    }

    #[test]
    fn partial_days_round_up() {
        let now = Utc::now();
        let target = now + Duration::days(10) + Duration::seconds(1);
        assert_eq!(days_until(now, target), 11);
        assert_eq!(days_until(now, now + Duration::hours(1)), 1);
    }

    #[test]
    fn past_targets_clamp_to_zero() {
        let now = Utc::now();
        assert!(days_until(now, now - Duration::days(3)) < 0);
        assert_eq!(days_remaining(now, now - Duration::days(3)), 0);
    }

    #[test]
    fn month_boundary() {
        let jan = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2025, 2, 1, 0, 1, 0).unwrap();
        let next_jan = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        assert!(!same_month(jan, feb));
        assert!(!same_month(jan, next_jan));
        assert!(same_month(feb, feb + Duration::days(3)));
    }
}
