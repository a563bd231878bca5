//! Local civil time from a UTC epoch and a fixed DST transition table.
//!
//! The panel has no zone database on board: the offset in force is looked up
//! in a precomputed table of `(threshold, offset_hours)` pairs. The offset that
//! applies at `t` is the one paired with the largest threshold strictly below
//! `t`. Timestamps outside the table are a hard error; the table has to be
//! regenerated before its horizon runs out.

use chrono::{DateTime, Datelike, Offset, TimeZone, Timelike};
use chrono_tz::Tz;
use thiserror::Error;

pub const SECONDS_PER_HOUR: i64 = 3600;

/// Mean Gregorian year, used to size generated tables
pub const SECONDS_PER_YEAR: i64 = 31_556_952;

/// Standard (winter) offset of the built-in zone, in hours
pub const BUILTIN_STANDARD_OFFSET_HOURS: i32 = 1;

/// Europe/Brussels DST boundaries 2024-2034, as flashed on the first panels.
/// Entries alternate summer start / summer end.
pub const BUILTIN_THRESHOLDS: [i64; 22] = [
    1711846800, // 2024-03-31
    1729994400,
    1743296400, // 2025-03-30
    1761444000,
    1774746000, // 2026-03-29
    1792893600,
    1806195600, // 2027-03-28
    1824948000,
    1837645200, // 2028-03-26
    1856397600,
    1869094800, // 2029-03-25
    1887847200,
    1901149200, // 2030-03-31
    1919296800,
    1932598800, // 2031-03-30
    1950746400,
    1964091600, // 2032-03-28
    1982844000,
    1995541200, // 2033-03-27
    2014293600,
    2026990800, // 2034-03-26
    2045743200,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("transition table is empty")]
    EmptyTable,

    #[error("transition thresholds must be strictly increasing (entry {index}: {threshold} after {previous})")]
    NotIncreasing {
        index: usize,
        previous: i64,
        threshold: i64,
    },

    #[error("timestamp {now} precedes the first transition threshold {first}")]
    BeforeTable { now: i64, first: i64 },

    #[error("timestamp {now} is past the last transition threshold {last}; the table must be regenerated")]
    TableExhausted { now: i64, last: i64 },

    #[error("timestamp {0} cannot be represented as a calendar date")]
    InvalidTimestamp(i64),

    #[error("zone offset of {seconds}s at {at} is not a whole number of hours")]
    FractionalOffset { at: i64, seconds: i32 },
}

/// One DST boundary: from just after `threshold`, local time is UTC + `offset_hours`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub threshold: i64,
    pub offset_hours: i32,
}

impl Transition {
    pub fn new(threshold: i64, offset_hours: i32) -> Self {
        Self {
            threshold,
            offset_hours,
        }
    }
}

/// Local calendar fields. Weekday is 0 for Monday through 6 for Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalClock {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub weekday: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

/// Ordered, immutable table of DST transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    entries: Vec<Transition>,
}

impl TransitionTable {
    /// Build a table, rejecting empty or non-increasing input.
    pub fn new(entries: Vec<Transition>) -> Result<Self, ClockError> {
        if entries.is_empty() {
            return Err(ClockError::EmptyTable);
        }

        for (index, pair) in entries.windows(2).enumerate() {
            if pair[1].threshold <= pair[0].threshold {
                return Err(ClockError::NotIncreasing {
                    index: index + 1,
                    previous: pair[0].threshold,
                    threshold: pair[1].threshold,
                });
            }
        }

        Ok(Self { entries })
    }

    /// The Europe/Brussels table the panel ships with (UTC+1 standard, UTC+2 summer).
    pub fn builtin() -> Self {
        let summer = BUILTIN_STANDARD_OFFSET_HOURS + 1;
        let entries = BUILTIN_THRESHOLDS
            .iter()
            .enumerate()
            .map(|(i, &threshold)| {
                let offset = if i % 2 == 0 {
                    summer
                } else {
                    BUILTIN_STANDARD_OFFSET_HOURS
                };
                Transition::new(threshold, offset)
            })
            .collect();

        Self { entries }
    }

    /// Generate a table for `tz` covering `horizon_years` from `from_epoch`.
    ///
    /// The first entry sits one second before `from_epoch` and carries the
    /// offset in force at that instant. Each later entry sits one second
    /// before an offset change takes effect, so the exclusive threshold rule
    /// switches exactly when the zone does. A closing entry at the end
    /// of the horizon keeps zones without DST covered. Zones with offsets that
    /// are not whole hours are rejected.
    pub fn from_zone(tz: Tz, from_epoch: i64, horizon_years: u32) -> Result<Self, ClockError> {
        let end = from_epoch + i64::from(horizon_years.max(1)) * SECONDS_PER_YEAR;

        let first = zone_offset_seconds(&tz, from_epoch)?;
        let mut entries = vec![Transition::new(
            from_epoch - 1,
            whole_hours(first, from_epoch)?,
        )];
        let mut previous = first;

        let mut at = from_epoch - from_epoch.rem_euclid(SECONDS_PER_HOUR) + SECONDS_PER_HOUR;
        while at < end {
            let current = zone_offset_seconds(&tz, at)?;
            if current != previous {
                let change = locate_change(&tz, at - SECONDS_PER_HOUR, at, current)?;
                entries.push(Transition::new(change - 1, whole_hours(current, change)?));
                previous = current;
            }
            at += SECONDS_PER_HOUR;
        }

        let closing = zone_offset_seconds(&tz, end)?;
        if entries.last().map_or(true, |last| last.threshold < end) {
            entries.push(Transition::new(end, whole_hours(closing, end)?));
        }

        Self::new(entries)
    }

    pub fn entries(&self) -> &[Transition] {
        &self.entries
    }

    /// Last instant the table can resolve.
    pub fn coverage_end(&self) -> i64 {
        self.entries.last().map_or(i64::MIN, |t| t.threshold)
    }

    /// Offset in seconds in force at `now`.
    pub fn resolve_offset(&self, now: i64) -> Result<i64, ClockError> {
        let (Some(first), Some(last)) = (self.entries.first(), self.entries.last()) else {
            return Err(ClockError::EmptyTable);
        };

        if now > last.threshold {
            return Err(ClockError::TableExhausted {
                now,
                last: last.threshold,
            });
        }

        self.entries
            .iter()
            .filter(|t| t.threshold < now)
            .last()
            .map(|t| i64::from(t.offset_hours) * SECONDS_PER_HOUR)
            .ok_or(ClockError::BeforeTable {
                now,
                first: first.threshold,
            })
    }

    /// Shift `now` by the resolved offset and split it into calendar fields.
    pub fn apply_correction(&self, now: i64) -> Result<LocalClock, ClockError> {
        let local = now + self.resolve_offset(now)?;
        let datetime = DateTime::from_timestamp(local, 0)
            .ok_or(ClockError::InvalidTimestamp(local))?
            .naive_utc();

        Ok(LocalClock {
            year: datetime.year(),
            month: datetime.month(),
            day: datetime.day(),
            weekday: datetime.weekday().num_days_from_monday(),
            hour: datetime.hour(),
            minute: datetime.minute(),
            second: datetime.second(),
        })
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn zone_offset_seconds(tz: &Tz, at: i64) -> Result<i32, ClockError> {
    let utc = DateTime::from_timestamp(at, 0).ok_or(ClockError::InvalidTimestamp(at))?;
    Ok(tz.offset_from_utc_datetime(&utc.naive_utc()).fix().local_minus_utc())
}

fn whole_hours(seconds: i32, at: i64) -> Result<i32, ClockError> {
    if seconds % (SECONDS_PER_HOUR as i32) != 0 {
        return Err(ClockError::FractionalOffset { at, seconds });
    }
    Ok(seconds / SECONDS_PER_HOUR as i32)
}

/// Binary search for the first second in `(before, after]` where `target` is in force.
fn locate_change(tz: &Tz, mut before: i64, mut after: i64, target: i32) -> Result<i64, ClockError> {
    while after - before > 1 {
        let mid = before + (after - before) / 2;
        if zone_offset_seconds(tz, mid)? == target {
            after = mid;
        } else {
            before = mid;
        }
    }
    Ok(after)
}
