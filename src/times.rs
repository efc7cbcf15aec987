//! Pure date/time helpers shared by the feed parsers and the board.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeError {
    #[error("invalid time format: {0}")]
    InvalidTimeFormat(String),
}

/// Parse a service clock value (`HH:MM:SS`, where `HH` may be >= 24 for
/// trips running past midnight) to seconds since service-day midnight.
pub fn parse_service_clock(clock: &str) -> Result<u32, TimeError> {
    let invalid = || TimeError::InvalidTimeFormat(clock.to_string());

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }
    let hours: u32 = parts[0].trim().parse().map_err(|_| invalid())?;
    let minutes: u32 = parts[1].trim().parse().map_err(|_| invalid())?;
    let seconds: u32 = parts[2].trim().parse().map_err(|_| invalid())?;
    if minutes >= 60 || seconds >= 60 {
        return Err(invalid());
    }
    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Convert seconds since service-day midnight to an absolute UTC instant.
/// Values >= 86400 roll over into the following calendar day.
pub fn service_secs_to_utc(service_date: NaiveDate, secs: u32) -> DateTime<Utc> {
    service_date.and_time(NaiveTime::MIN).and_utc() + Duration::seconds(i64::from(secs))
}

/// Resolve a day-rollover clock against its service date: `25:30:00` on
/// 2025-10-06 is 2025-10-07T01:30:00Z.
pub fn parse_service_time(
    service_date: NaiveDate,
    clock: &str,
) -> Result<DateTime<Utc>, TimeError> {
    Ok(service_secs_to_utc(service_date, parse_service_clock(clock)?))
}

/// Inclusive range test on absolute timestamps.
pub fn in_absolute_window(t: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    t >= start && t <= end
}

/// Wrap-around time-of-day membership: true when the departure's wall-clock
/// time lies at most `window_minutes` ahead of `now`'s wall-clock time.
/// Crosses midnight correctly: a departure at 00:10 is 12 minutes ahead of
/// now = 23:58.
pub fn in_time_of_day_window(
    departure: DateTime<Utc>,
    now: DateTime<Utc>,
    window_minutes: i64,
) -> bool {
    let dep_minutes = i64::from(departure.hour() * 60 + departure.minute());
    let now_minutes = i64::from(now.hour() * 60 + now.minute());
    let diff = (dep_minutes - now_minutes).rem_euclid(24 * 60);
    diff <= window_minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn instant(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        date(y, m, d).and_hms_opt(h, min, 0).unwrap().and_utc()
    }

    #[test]
    fn parses_plain_clock_values() {
        assert_eq!(parse_service_clock("00:00:00").unwrap(), 0);
        assert_eq!(parse_service_clock("03:00:00").unwrap(), 10800);
        assert_eq!(parse_service_clock("23:59:59").unwrap(), 86399);
    }

    #[test]
    fn parses_day_rollover_clock_values() {
        assert_eq!(parse_service_clock("24:00:00").unwrap(), 86400);
        assert_eq!(parse_service_clock("25:30:00").unwrap(), 91800);
        assert_eq!(parse_service_clock("27:15:30").unwrap(), 98130);
    }

    #[test]
    fn rejects_malformed_clock_values() {
        for bad in ["", "10:00", "10:00:00:00", "ab:cd:ef", "10:60:00", "10:00:60", "-1:00:00"] {
            assert!(
                parse_service_clock(bad).is_err(),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn service_time_stays_on_service_date_without_rollover() {
        let t = parse_service_time(date(2025, 10, 6), "03:00:00").unwrap();
        assert_eq!(t, instant(2025, 10, 6, 3, 0));
    }

    #[test]
    fn service_time_rolls_into_the_next_day() {
        let t = parse_service_time(date(2025, 10, 6), "25:30:00").unwrap();
        assert_eq!(t, instant(2025, 10, 7, 1, 30));
    }

    #[test]
    fn absolute_window_is_inclusive() {
        let start = instant(2025, 10, 6, 10, 0);
        let end = instant(2025, 10, 6, 12, 0);
        assert!(in_absolute_window(start, start, end));
        assert!(in_absolute_window(end, start, end));
        assert!(in_absolute_window(instant(2025, 10, 6, 11, 0), start, end));
        assert!(!in_absolute_window(instant(2025, 10, 6, 12, 1), start, end));
        assert!(!in_absolute_window(instant(2025, 10, 6, 9, 59), start, end));
    }

    #[test]
    fn time_of_day_window_wraps_past_midnight() {
        let now = instant(2025, 10, 6, 23, 55);
        // 00:30 the next day is 35 minutes ahead.
        assert!(in_time_of_day_window(instant(2025, 10, 7, 0, 30), now, 120));
        // 22:00 the same evening is behind `now`, i.e. 1325 minutes "ahead".
        assert!(!in_time_of_day_window(instant(2025, 10, 6, 22, 0), now, 120));
    }

    #[test]
    fn time_of_day_window_includes_now_and_excludes_just_behind() {
        let now = instant(2025, 10, 6, 10, 0);
        assert!(in_time_of_day_window(now, now, 0));
        assert!(!in_time_of_day_window(instant(2025, 10, 6, 9, 59), now, 120));
    }
}
