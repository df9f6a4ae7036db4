/// Types and utilities for manipulating clock readings.
///
/// Two clock formats occur in the wild.  Units with a battery-backed RTC stamp wall-clock time
/// with millisecond precision ("2025-08-25 16:52:08.434"); units without one stamp monotonic
/// seconds since boot ("[  123.456]").  Analyses need a single comparable axis, so both resolve
/// to TimePoint: microseconds since the Unix epoch for wall readings, microseconds since boot for
/// monotonic readings.  The two ranges are far apart (any plausible wall time is > 30 years of
/// microseconds) and format_timepoint uses that to pick a rendering.
use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

pub type Timestamp = DateTime<Utc>;

/// A point on the normalized time axis, in microseconds.

pub type TimePoint = i64;

/// Microseconds per second, used throughout the analyses.

pub const MICROS_PER_SEC: i64 = 1_000_000;

// Below this, a TimePoint is taken to be a boot-relative reading.  2001-09-09 in wall time; no
// ECU log predates that.

const WALL_FLOOR: TimePoint = 1_000_000_000 * MICROS_PER_SEC;

/// Parse a wall-clock reading.  The millisecond part is optional; some bootloader banners omit
/// it.

pub fn parse_timestamp(s: &str) -> Result<Timestamp> {
    let naive = match NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f") {
        Ok(t) => t,
        Err(_) => match NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            Ok(t) => t,
            Err(_) => {
                bail!("Unparseable timestamp {s}")
            }
        },
    };
    Ok(Utc.from_utc_datetime(&naive))
}

/// Microseconds since the Unix epoch.

pub fn wall_micros(t: Timestamp) -> TimePoint {
    t.timestamp_micros()
}

/// Parse a monotonic reading, seconds with an optional fractional part, into microseconds.
/// Negative readings are nonsense and rejected.

pub fn parse_mono_micros(s: &str) -> Result<TimePoint> {
    let secs = match s.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => n,
        _ => {
            bail!("Unparseable monotonic reading {s}")
        }
    };
    Ok((secs * MICROS_PER_SEC as f64).round() as TimePoint)
}

/// Render a TimePoint: wall-clock form when it is plausibly a wall time, seconds-since-boot
/// otherwise.

pub fn format_timepoint(t: TimePoint) -> String {
    if t >= WALL_FLOOR {
        match Utc.timestamp_micros(t) {
            chrono::LocalResult::Single(ts) => ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            _ => format!("{t}us"),
        }
    } else {
        format!("{:.3}s", t as f64 / MICROS_PER_SEC as f64)
    }
}

// This tests:
//  - both wall formats, with and without milliseconds
//  - rejection of garbage

#[test]
fn test_parse_timestamp() {
    let t = parse_timestamp("2025-08-25 16:52:08.434").unwrap();
    assert!(wall_micros(t) % MICROS_PER_SEC == 434_000);
    let t2 = parse_timestamp("2025-08-25 16:52:08").unwrap();
    assert!(wall_micros(t) - wall_micros(t2) == 434_000);
    assert!(parse_timestamp("2025-13-25 16:52:08").is_err());
    assert!(parse_timestamp("yesterday").is_err());
}

// This tests:
//  - monotonic parsing and rounding
//  - rejection of negative and non-numeric readings

#[test]
fn test_parse_mono() {
    assert!(parse_mono_micros("123.456").unwrap() == 123_456_000);
    assert!(parse_mono_micros("0").unwrap() == 0);
    assert!(parse_mono_micros("  7.5 ").unwrap() == 7_500_000);
    assert!(parse_mono_micros("-1.0").is_err());
    assert!(parse_mono_micros("nan").is_err());
    assert!(parse_mono_micros("soon").is_err());
}

// This tests:
//  - the wall/boot-relative rendering split

#[test]
fn test_format_timepoint() {
    let t = wall_micros(parse_timestamp("2025-08-25 16:52:08.434").unwrap());
    assert!(format_timepoint(t) == "2025-08-25 16:52:08.434");
    assert!(format_timepoint(123_456_000) == "123.456s");
}
