use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{Result, TimelapseError};

pub const DEFAULT_START_TIME: &str = "00:00";
pub const DEFAULT_END_TIME: &str = "23:59:59";

/// Time-of-day interval during which capture is allowed. Both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn full_day() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
        }
    }

    /// Builds a window from optional `HH:MM[:SS]` strings, filling in the
    /// whole-day defaults for missing ends.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = parse_time_of_day("start_time", start.unwrap_or(DEFAULT_START_TIME))?;
        let end = parse_time_of_day("end_time", end.unwrap_or(DEFAULT_END_TIME))?;
        Ok(Self { start, end })
    }

    /// A window whose start is after its end wraps past midnight.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= now && now <= self.end
        } else {
            now >= self.start || now <= self.end
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::full_day()
    }
}

pub fn parse_time_of_day(field: &str, value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| {
            TimelapseError::invalid_field(field, format!("'{value}' is not HH:MM or HH:MM:SS"))
        })
}
