//! Refresh gating.
//!
//! Both functions take `now` from the caller instead of reading the clock,
//! so they stay pure and deterministic under test.

use chrono::{DateTime, Utc};
use std::time::Duration;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Returns `true` when a station last updated at `last_update` should be
/// refreshed at `now`.
///
/// A station that was never updated is always due. Otherwise it is due once
/// `now >= last_update + interval_hours * 3600`. No clamping happens here;
/// `interval_hours` is validated when configuration is loaded.
pub fn is_due(last_update: Option<DateTime<Utc>>, interval_hours: f64, now: DateTime<Utc>) -> bool {
    let Some(last_update) = last_update else {
        return true;
    };

    let elapsed = (now - last_update).num_milliseconds() as f64 / 1000.0;
    elapsed >= interval_hours * SECONDS_PER_HOUR
}

/// Tick period for the scheduled bulk refresh.
///
/// Half-hourly when the refresh interval is half an hour or less, hourly
/// otherwise. The per-station gate still runs on every tick.
pub fn tick_period(interval_hours: f64) -> Duration {
    if interval_hours <= 0.5 {
        Duration::from_secs(30 * 60)
    } else {
        Duration::from_secs(60 * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    #[test]
    fn never_updated_is_always_due() {
        for interval in [0.5, 1.0, 24.0, 1000.0] {
            assert!(is_due(None, interval, fixed_now()));
        }
        assert!(is_due(None, 1.0, DateTime::<Utc>::UNIX_EPOCH));
    }

    #[test]
    fn due_exactly_at_boundary() {
        for interval in [0.5, 1.0, 1.5, 24.0] {
            let last = fixed_now();
            let boundary = last + TimeDelta::seconds((interval * 3600.0) as i64);

            assert!(
                !is_due(Some(last), interval, boundary - TimeDelta::seconds(1)),
                "one second before the boundary must not be due (interval {interval})"
            );
            assert!(
                is_due(Some(last), interval, boundary),
                "the boundary itself must be due (interval {interval})"
            );
        }
    }

    #[test]
    fn well_past_interval_is_due() {
        let last = fixed_now() - TimeDelta::hours(5);
        assert!(is_due(Some(last), 2.0, fixed_now()));
    }

    #[test]
    fn clock_behind_last_update_is_not_due() {
        let last = fixed_now() + TimeDelta::minutes(10);
        assert!(!is_due(Some(last), 0.5, fixed_now()));
    }

    #[test]
    fn tick_period_follows_interval() {
        assert_eq!(tick_period(0.5), Duration::from_secs(1800));
        assert_eq!(tick_period(0.25), Duration::from_secs(1800));
        assert_eq!(tick_period(1.0), Duration::from_secs(3600));
        assert_eq!(tick_period(24.0), Duration::from_secs(3600));
    }
}
