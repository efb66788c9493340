//! Sortable wall-clock timestamps.
//!
//! A [`Timestamp`] packs `YYYYMMDDHHMMSS` and a three-digit millisecond
//! component into a single base-10 integer, e.g. `20240131235959999`.
//! Values compare in calendar order, so the same number serves as the
//! range-query score and as the value shown to clients. This is not Unix
//! time: subtracting two timestamps does not give a duration.

use std::fmt;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

const YEAR: u64 = 10_000_000_000_000;
const MONTH: u64 = 100_000_000_000;
const DAY: u64 = 1_000_000_000;
const HOUR: u64 = 10_000_000;
const MINUTE: u64 = 100_000;
const SECOND: u64 = 1_000;

/// Number of decimal digits in an encoded timestamp.
pub const ENCODED_DIGITS: usize = 17;

/// Calendar-ordered integer timestamp with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const MIN: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Encode a point in time using the calendar of its own time zone.
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        // Leap seconds report up to 1999ms; the slot only holds three digits.
        let millis = u64::from(dt.timestamp_subsec_millis().min(999));
        let year = u64::try_from(dt.year()).unwrap_or(0);
        Self(
            year * YEAR
                + u64::from(dt.month()) * MONTH
                + u64::from(dt.day()) * DAY
                + u64::from(dt.hour()) * HOUR
                + u64::from(dt.minute()) * MINUTE
                + u64::from(dt.second()) * SECOND
                + millis,
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> u64 {
        ts.0
    }
}

/// Which calendar the encoder reads wall-clock time in.
///
/// UTC never repeats an hour, so scores only move forward. Local time
/// jumps back at a daylight-saving fall-back and readings from the repeated
/// hour then score below ones already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clock {
    #[default]
    Utc,
    /// Host local time.
    Local,
}

impl Clock {
    /// Current wall-clock time as a [`Timestamp`].
    ///
    /// Pure function of the system clock; safe to call from any number of
    /// tasks at once. Two calls within the same millisecond return the same
    /// value.
    pub fn now(self) -> Timestamp {
        self.encode(&Utc::now())
    }

    /// Encode an instant in this clock's calendar.
    pub fn encode(self, instant: &DateTime<Utc>) -> Timestamp {
        match self {
            Clock::Utc => Timestamp::from_datetime(instant),
            Clock::Local => Timestamp::from_datetime(&instant.with_timezone(&Local)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_nanosecond(ms * 1_000_000)
            .unwrap()
    }

    #[test]
    fn encodes_calendar_digits() {
        let ts = Timestamp::from_datetime(&utc(2024, 1, 31, 23, 59, 59, 999));
        assert_eq!(ts.as_u64(), 20240131235959999);
        assert_eq!(ts.to_string().len(), ENCODED_DIGITS);
    }

    #[test]
    fn zero_pads_every_field() {
        let ts = Timestamp::from_datetime(&utc(2024, 3, 4, 5, 6, 7, 8));
        assert_eq!(ts.to_string(), "20240304050607008");
    }

    #[test]
    fn orders_across_year_boundary() {
        let before = Timestamp::from_datetime(&utc(2023, 12, 31, 23, 59, 59, 999));
        let after = Timestamp::from_datetime(&utc(2024, 1, 1, 0, 0, 0, 0));
        assert!(before < after);
    }

    #[test]
    fn successive_calls_never_decrease() {
        let mut last = Clock::Utc.now();
        for _ in 0..1000 {
            let next = Clock::Utc.now();
            assert!(next >= last, "{next} < {last}");
            last = next;
        }
    }

    #[test]
    fn clock_now_has_encoded_width() {
        assert_eq!(Clock::default().now().to_string().len(), ENCODED_DIGITS);
        assert_eq!(Clock::Local.now().to_string().len(), ENCODED_DIGITS);
    }

    #[test]
    fn default_clock_is_utc() {
        assert_eq!(Clock::default(), Clock::Utc);
    }

    #[test]
    fn default_clock_never_repeats_an_hour() {
        // 2024-11-03 05:59:59.999 UTC, one millisecond before US Eastern
        // falls back from 01:59:59.999 EDT to 01:00:00.000 EST.
        let before = Utc.timestamp_millis_opt(1_730_613_599_999).unwrap();
        let after = Utc.timestamp_millis_opt(1_730_613_600_000).unwrap();

        let clock = Clock::default();
        let a = clock.encode(&before);
        let b = clock.encode(&after);
        assert!(b >= a, "regressed: {b} < {a}");
        assert_eq!(a.as_u64(), 20241103055959999);
        assert_eq!(b.as_u64(), 20241103060000000);
    }

    #[test]
    fn serializes_as_bare_integer() {
        let ts = Timestamp::from_raw(20240131235959999);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "20240131235959999");
    }
}
