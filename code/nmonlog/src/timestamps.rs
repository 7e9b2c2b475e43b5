/// Time codes and their resolution to instants.
///
/// Data rows do not carry a time, they carry a short code (T0001, T0002, ...) that refers to a
/// ZZZZ line declared once earlier in the file:
///
///   ZZZZ,T0001,18:30:17,06-NOV-2022
///
/// The stamp is wall-clock time in the zone the capture was taken in, which the file does not
/// record, so the zone comes from the configuration.
use crate::error::{ImportError, Result};

use chrono::{FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use nmonutils::{now, parse_fixed_offset, truncate_to_day, Timestamp};
use std::collections::HashMap;

/// Layout of a stamp after the separator between time and date has been normalized.
const STAMP_FORMAT: &str = "%H:%M:%S %d-%b-%Y";

/// The stamp that resolves to "today", used when writing checkpoints.
pub const NOW_STAMP: &str = "now";

/// The resume baseline used when there is no checkpoint, or when importing is forced.
pub const MIN_STAMP: &str = "00:00:00,01-JAN-1900";

/// Offset used when a configured zone name is not known.
const FALLBACK_OFFSET_SECS: i32 = 2 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timezone {
    Named(Tz),
    Fixed(FixedOffset),
    Local,
}

impl Timezone {
    /// Interpret the configured zone.  The empty string means the local zone.  A string that looks
    /// like an offset must be a valid offset.  An unknown zone name is not an error, it falls
    /// back to a fixed +02:00 zone with a warning.

    pub fn from_config(name: &str) -> Result<Timezone> {
        let name = name.trim();
        if name == "" {
            return Ok(Timezone::Local);
        }
        if name.starts_with('+') || name.starts_with('-') || name == "Z" {
            return match parse_fixed_offset(name) {
                Ok(off) => Ok(Timezone::Fixed(off)),
                Err(e) => Err(ImportError::ConfigInvalid(format!(
                    "Bad timezone offset '{name}': {e}"
                ))),
            };
        }
        match name.parse::<Tz>() {
            Ok(tz) => Ok(Timezone::Named(tz)),
            Err(_) => {
                tracing::warn!("Unknown timezone '{name}', using fixed offset +02:00");
                Ok(Timezone::Fixed(
                    FixedOffset::east_opt(FALLBACK_OFFSET_SECS).unwrap(),
                ))
            }
        }
    }

    // Ambiguous local times (the hour repeated when DST ends) resolve to the earlier instant.
    // Local times that don't exist (skipped when DST starts) don't resolve.
    fn to_instant(&self, t: &NaiveDateTime) -> Option<Timestamp> {
        match self {
            Timezone::Named(tz) => tz.from_local_datetime(t).earliest().map(|d| d.with_timezone(&Utc)),
            Timezone::Fixed(off) => off.from_local_datetime(t).earliest().map(|d| d.with_timezone(&Utc)),
            Timezone::Local => Local.from_local_datetime(t).earliest().map(|d| d.with_timezone(&Utc)),
        }
    }
}

/// Convert a raw stamp to an instant.  "now" is the current time truncated to a day boundary.

pub fn parse_stamp(s: &str, tz: &Timezone) -> Result<Timestamp> {
    if s == NOW_STAMP {
        return Ok(truncate_to_day(now()));
    }
    let bad = || ImportError::TimestampUnresolved {
        code: s.to_string(),
    };
    // The character between the time and the date is the file's delimiter, normalize it.
    let (Some(time), Some(date)) = (s.get(0..8), s.get(9..)) else {
        return Err(bad());
    };
    let stamp = format!("{time} {date}");
    let t = NaiveDateTime::parse_from_str(&stamp, STAMP_FORMAT).map_err(|_| bad())?;
    // Points carry nanoseconds since the epoch, which covers 1677-2262 only.
    match tz.to_instant(&t) {
        Some(instant) if instant.timestamp_nanos_opt().is_some() => Ok(instant),
        _ => Err(bad()),
    }
}

/// The time codes declared in one file, and the zone to interpret them in.

#[derive(Debug, Clone)]
pub struct TimestampTable {
    tz: Timezone,
    stamps: HashMap<String, String>,
}

impl TimestampTable {
    pub fn new(tz: Timezone) -> TimestampTable {
        TimestampTable {
            tz,
            stamps: HashMap::new(),
        }
    }

    /// Record a declaration.  A later declaration of the same code replaces the earlier one.

    pub fn declare(&mut self, code: &str, stamp: &str) {
        self.stamps.insert(code.to_string(), stamp.to_string());
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// The raw stamp declared for the code.

    pub fn raw(&self, code: &str) -> Result<&str> {
        match self.stamps.get(code) {
            Some(s) => Ok(s.as_str()),
            None => Err(ImportError::TimestampUnresolved {
                code: code.to_string(),
            }),
        }
    }

    /// The instant declared for the code.

    pub fn resolve(&self, code: &str) -> Result<Timestamp> {
        parse_stamp(self.raw(code)?, &self.tz).map_err(|_| ImportError::TimestampUnresolved {
            code: code.to_string(),
        })
    }

    /// The earliest and latest declared instants, if any code resolves.

    pub fn time_frame(&self) -> Option<(Timestamp, Timestamp)> {
        let mut bounds: Option<(Timestamp, Timestamp)> = None;
        for stamp in self.stamps.values() {
            if let Ok(t) = parse_stamp(stamp, &self.tz) {
                bounds = match bounds {
                    None => Some((t, t)),
                    Some((lo, hi)) => Some((lo.min(t), hi.max(t))),
                };
            }
        }
        bounds
    }
}

#[cfg(test)]
use nmonutils::timestamp_from_ymdhms;

#[test]
fn test_parse_stamp() {
    let utc = Timezone::Fixed(FixedOffset::east_opt(0).unwrap());
    let t = parse_stamp("18:30:17,06-NOV-2022", &utc).unwrap();
    assert!(t == timestamp_from_ymdhms(2022, 11, 6, 18, 30, 17));

    // Any single-character separator, and any case for the month
    let t2 = parse_stamp("18:30:17;06-Nov-2022", &utc).unwrap();
    assert!(t == t2);

    let paris = Timezone::from_config("Europe/Paris").unwrap();
    let t = parse_stamp("18:30:17,06-NOV-2022", &paris).unwrap();
    assert!(t == timestamp_from_ymdhms(2022, 11, 6, 17, 30, 17));
    let t = parse_stamp("18:30:17,06-JUL-2022", &paris).unwrap();
    assert!(t == timestamp_from_ymdhms(2022, 7, 6, 16, 30, 17));

    assert!(parse_stamp("18:30:17", &utc).is_err());
    assert!(parse_stamp("garbage,06-NOV-2022", &utc).is_err());
    assert!(parse_stamp("", &utc).is_err());

    // Grammatical, but not representable as nanoseconds since the epoch
    assert!(matches!(
        parse_stamp("18:30:17,06-NOV-2300", &utc),
        Err(ImportError::TimestampUnresolved { .. })
    ));
    assert!(parse_stamp(MIN_STAMP, &utc).is_ok());
}

#[test]
fn test_now_stamp() {
    let t = parse_stamp(NOW_STAMP, &Timezone::Local).unwrap();
    assert!(t == truncate_to_day(t));
    assert!(t <= now());
}

#[test]
fn test_timezone_from_config() {
    assert!(Timezone::from_config("").unwrap() == Timezone::Local);
    assert!(
        Timezone::from_config("+05:30").unwrap()
            == Timezone::Fixed(FixedOffset::east_opt(5 * 3600 + 1800).unwrap())
    );
    assert!(
        Timezone::from_config("Not/AZone").unwrap()
            == Timezone::Fixed(FixedOffset::east_opt(FALLBACK_OFFSET_SECS).unwrap())
    );
    assert!(matches!(
        Timezone::from_config("+99:00"),
        Err(ImportError::ConfigInvalid(_))
    ));
}

#[test]
fn test_resolve() {
    let mut table = TimestampTable::new(Timezone::Fixed(FixedOffset::east_opt(0).unwrap()));
    table.declare("T0001", "18:30:17,06-NOV-2022");
    table.declare("T0002", "18:35:17,06-NOV-2022");
    table.declare("T0003", "bogus");
    let a = table.resolve("T0001").unwrap();
    let b = table.resolve("T0001").unwrap();
    assert!(a == b);
    assert!(table.resolve("T0002").unwrap() > a);
    assert!(matches!(
        table.resolve("T0009"),
        Err(ImportError::TimestampUnresolved { .. })
    ));
    assert!(table.resolve("T0003").is_err());
    let (lo, hi) = table.time_frame().unwrap();
    assert!(lo == a && hi == table.resolve("T0002").unwrap());

    let empty = TimestampTable::new(Timezone::Local);
    assert!(empty.time_frame().is_none());
}
