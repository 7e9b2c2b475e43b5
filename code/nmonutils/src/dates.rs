/// Types and utilities for manipulating timestamps.
///
/// A Timestamp is an instant, always held in UTC.  Zone-specific interpretation of wall-clock
/// strings happens in nmonlog, which knows which zone a capture file was written in.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};

pub type Timestamp = DateTime<Utc>;

/// The time right now.

pub fn now() -> Timestamp {
    Utc::now()
}

/// "A long long time ago".

pub fn epoch() -> Timestamp {
    timestamp_from_ymd(1970, 1, 1)
}

/// Given year, month, day, hour, minute, second (all UTC), return a Timestamp.

pub fn timestamp_from_ymdhms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
    Utc.from_utc_datetime(
        &NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap(),
    )
}

/// Given year, month, day (all UTC), return a Timestamp.

pub fn timestamp_from_ymd(y: i32, mo: u32, d: u32) -> Timestamp {
    timestamp_from_ymdhms(y, mo, d, 0, 0, 0)
}

/// Return the timestamp with the time-of-day (UTC) cleared out.

pub fn truncate_to_day(t: Timestamp) -> Timestamp {
    t - Duration::seconds(t.num_seconds_from_midnight() as i64)
        - Duration::nanoseconds(t.nanosecond() as i64)
}

/// Parse a fixed UTC offset of the form "+HH:MM", "-HH:MM", "+HHMM" or "Z".  Hours must be at
/// most 23 and minutes at most 59.

pub fn parse_fixed_offset(s: &str) -> Result<FixedOffset> {
    if s == "Z" || s == "z" {
        return Ok(FixedOffset::east_opt(0).unwrap());
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => bail!("Offset must start with '+' or '-'"),
    };
    let digits = rest.replace(':', "");
    if digits.len() != 4 || !digits.bytes().all(|c| c.is_ascii_digit()) {
        bail!("Offset must have the form +HH:MM");
    }
    let hours = digits[0..2].parse::<i32>()?;
    let minutes = digits[2..4].parse::<i32>()?;
    if hours > 23 || minutes > 59 {
        bail!("Offset out of range");
    }
    match FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)) {
        Some(off) => Ok(off),
        None => bail!("Offset out of range"),
    }
}

#[test]
fn test_truncate_to_day() {
    let t = timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17) + Duration::milliseconds(250);
    assert!(truncate_to_day(t) == timestamp_from_ymd(2022, 11, 6));
    assert!(truncate_to_day(epoch()) == epoch());
}

#[test]
fn test_parse_fixed_offset() {
    assert!(parse_fixed_offset("+02:00").unwrap().local_minus_utc() == 7200);
    assert!(parse_fixed_offset("-0530").unwrap().local_minus_utc() == -(5 * 3600 + 30 * 60));
    assert!(parse_fixed_offset("Z").unwrap().local_minus_utc() == 0);
    assert!(parse_fixed_offset("+25:00").is_err());
    assert!(parse_fixed_offset("+2:00").is_err());
    assert!(parse_fixed_offset("02:00").is_err());
}
