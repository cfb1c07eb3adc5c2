//! Calendar timestamp <-> tick conversion.
//!
//! A time scale is an epoch date (taken at midnight) plus a number of ticks per
//! day. Stored times are `i64` ticks elapsed since the epoch. Conversion runs in
//! 128-bit integer nanoseconds, so it is exact whenever the tick divides a
//! nanosecond-resolution day evenly and otherwise floors to the tick.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use time::macros::{date, format_description};
use time::{Date, Duration, PrimitiveDateTime};

use crate::{Error, Result};

pub const NANOS_PER_DAY: i64 = 86_400_000_000_000;
const NANOS_PER_SECOND: i128 = 1_000_000_000;
const UNIX_EPOCH_JULIAN_DAY: i64 = 2_440_588;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeScale {
    epoch: Date,
    ticks_per_day: i64,
}

impl TimeScale {
    pub fn new(epoch: Date, ticks_per_day: i64) -> Result<Self> {
        if ticks_per_day <= 0 || ticks_per_day > NANOS_PER_DAY {
            return Err(Error::Format(format!(
                "ticks per day must be in 1..={NANOS_PER_DAY}, got {ticks_per_day}"
            )));
        }
        Ok(Self {
            epoch,
            ticks_per_day,
        })
    }

    pub fn epoch(&self) -> Date {
        self.epoch
    }

    pub fn ticks_per_day(&self) -> i64 {
        self.ticks_per_day
    }

    /// Epoch as whole days relative to 1970-01-01, the on-disk representation.
    pub fn epoch_days(&self) -> i64 {
        self.epoch.to_julian_day() as i64 - UNIX_EPOCH_JULIAN_DAY
    }

    pub fn from_epoch_days(epoch_days: i64, ticks_per_day: i64) -> Result<Self> {
        let julian = epoch_days
            .checked_add(UNIX_EPOCH_JULIAN_DAY)
            .and_then(|day| i32::try_from(day).ok())
            .ok_or_else(|| Error::TimeRange(format!("epoch day {epoch_days} out of range")))?;
        let epoch = Date::from_julian_day(julian)
            .map_err(|_| Error::TimeRange(format!("epoch day {epoch_days} out of range")))?;
        Self::new(epoch, ticks_per_day)
    }

    pub fn to_ticks(&self, timestamp: PrimitiveDateTime) -> Result<i64> {
        let elapsed = timestamp - self.epoch.midnight();
        if elapsed.is_negative() {
            return Err(Error::TimeRange(format!(
                "{timestamp} predates epoch {}",
                self.epoch
            )));
        }
        let ticks =
            elapsed.whole_nanoseconds() * self.ticks_per_day as i128 / NANOS_PER_DAY as i128;
        i64::try_from(ticks).map_err(|_| {
            Error::TimeRange(format!(
                "{timestamp} overflows 64-bit ticks at {} ticks/day",
                self.ticks_per_day
            ))
        })
    }

    pub fn to_calendar(&self, ticks: i64) -> Result<PrimitiveDateTime> {
        if ticks < 0 {
            return Err(Error::TimeRange(format!("negative tick value {ticks}")));
        }
        let nanos = ticks as i128 * NANOS_PER_DAY as i128 / self.ticks_per_day as i128;
        let seconds = i64::try_from(nanos / NANOS_PER_SECOND)
            .map_err(|_| Error::TimeRange(format!("tick value {ticks} out of range")))?;
        let elapsed = Duration::new(seconds, (nanos % NANOS_PER_SECOND) as i32);
        self.epoch
            .midnight()
            .checked_add(elapsed)
            .ok_or_else(|| Error::TimeRange(format!("tick value {ticks} out of calendar range")))
    }
}

impl fmt::Display for TimeScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.ticks_per_day)
    }
}

/// Named presets. Passed explicitly wherever a preset id must be resolved.
#[derive(Clone, Debug)]
pub struct TimeScaleTable {
    presets: BTreeMap<String, TimeScale>,
}

impl TimeScaleTable {
    pub fn empty() -> Self {
        Self {
            presets: BTreeMap::new(),
        }
    }

    pub fn standard() -> Self {
        let unix = date!(1970 - 01 - 01);
        let mut table = Self::empty();
        table.insert_unchecked("unix-ns", unix, NANOS_PER_DAY);
        table.insert_unchecked("unix-us", unix, 86_400_000_000);
        table.insert_unchecked("unix-ms", unix, 86_400_000);
        table.insert_unchecked("java", unix, 86_400_000);
        table.insert_unchecked("unix-s", unix, 86_400);
        table.insert_unchecked("unix-min", unix, 1_440);
        table.insert_unchecked("net", date!(0001 - 01 - 01), 864_000_000_000);
        table
    }

    fn insert_unchecked(&mut self, id: &str, epoch: Date, ticks_per_day: i64) {
        self.presets.insert(
            id.to_string(),
            TimeScale {
                epoch,
                ticks_per_day,
            },
        );
    }

    pub fn insert(&mut self, id: impl Into<String>, scale: TimeScale) -> Option<TimeScale> {
        self.presets.insert(id.into(), scale)
    }

    pub fn lookup(&self, id: &str) -> Result<TimeScale> {
        self.presets
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownTimeScale(id.to_string()))
    }

    /// First preset id (alphabetically) that maps to `scale`.
    pub fn name_of(&self, scale: &TimeScale) -> Option<&str> {
        self.presets
            .iter()
            .find(|(_, preset)| *preset == scale)
            .map(|(id, _)| id.as_str())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }
}

impl Default for TimeScaleTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Either a preset id to resolve against a table or an explicit scale.
///
/// The textual form is a preset id (`unix-ms`) or `YYYY-MM-DD:TICKS_PER_DAY`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeScaleSpec {
    Preset(String),
    Explicit(TimeScale),
}

impl TimeScaleSpec {
    pub fn resolve(&self, table: &TimeScaleTable) -> Result<TimeScale> {
        match self {
            TimeScaleSpec::Preset(id) => table.lookup(id),
            TimeScaleSpec::Explicit(scale) => Ok(*scale),
        }
    }
}

impl From<TimeScale> for TimeScaleSpec {
    fn from(value: TimeScale) -> Self {
        TimeScaleSpec::Explicit(value)
    }
}

impl From<&str> for TimeScaleSpec {
    fn from(value: &str) -> Self {
        TimeScaleSpec::Preset(value.to_string())
    }
}

impl FromStr for TimeScaleSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((epoch, ticks)) = s.split_once(':') else {
            if s.is_empty() {
                return Err(Error::UnknownTimeScale(String::new()));
            }
            return Ok(TimeScaleSpec::Preset(s.to_string()));
        };
        let epoch = Date::parse(epoch.trim(), format_description!("[year]-[month]-[day]"))
            .map_err(|err| Error::Format(format!("invalid epoch '{epoch}': {err}")))?;
        let ticks_per_day = ticks
            .trim()
            .parse::<i64>()
            .map_err(|err| Error::Format(format!("invalid ticks per day '{ticks}': {err}")))?;
        Ok(TimeScaleSpec::Explicit(TimeScale::new(epoch, ticks_per_day)?))
    }
}
