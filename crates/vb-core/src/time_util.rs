//! Wall-clock helpers.
//!
//! The strategy runs on exchange-local calendar days (KST for Upbit), so
//! every daily schedule is expressed as a [`NaiveTime`] interpreted in a
//! fixed UTC offset.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};

/// Build a fixed offset from whole hours east of UTC.
///
/// Out-of-range values fall back to UTC.
pub fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.saturating_mul(3600)).unwrap_or_else(|| Utc.fix())
}

/// Next instant strictly after `now` at which the local clock reads `at`.
///
/// If `now` is exactly at or past today's `at`, the result is tomorrow's.
pub fn next_daily_fire(now: DateTime<FixedOffset>, at: NaiveTime) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let today = now.date_naive().and_time(at);
    let candidate = offset
        .from_local_datetime(&today)
        .single()
        .unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kst(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        offset_from_hours(9)
            .with_ymd_and_hms(2025, 3, 14, h, m, s)
            .single()
            .unwrap()
    }

    #[test]
    fn fires_later_today() {
        let at = NaiveTime::from_hms_opt(9, 0, 20).unwrap();
        let next = next_daily_fire(kst(8, 30, 0), at);
        assert_eq!(next, kst(9, 0, 20));
    }

    #[test]
    fn rolls_to_tomorrow_when_passed() {
        let at = NaiveTime::from_hms_opt(8, 59, 50).unwrap();
        let next = next_daily_fire(kst(8, 59, 50), at);
        assert_eq!(next, kst(8, 59, 50) + Duration::days(1));

        let next = next_daily_fire(kst(23, 0, 0), at);
        assert_eq!(next - kst(23, 0, 0), Duration::hours(9) + Duration::minutes(59) + Duration::seconds(50));
    }

    #[test]
    fn offset_hours() {
        assert_eq!(offset_from_hours(9).local_minus_utc(), 9 * 3600);
        assert_eq!(offset_from_hours(99).local_minus_utc(), 0);
    }
}
