use chrono::{DateTime, Datelike, FixedOffset, Local, NaiveDate, Offset, Utc};
use rusqlite::types::Value;

use crate::error::CoreError;

/// Seconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const APPLE_EPOCH_OFFSET: i64 = 978_307_200;

/// Values above this magnitude are nanoseconds; older stores wrote seconds.
const NANOS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarZone {
    Local,
    Fixed(FixedOffset),
}

impl CalendarZone {
    /// Accepts `local`, `utc`/`z`, or an offset such as `+05:30` / `-0800`.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" | "" => return Ok(CalendarZone::Local),
            "utc" | "z" => return Ok(CalendarZone::utc()),
            _ => {}
        }
        let invalid = || CoreError::Config(format!("unrecognized timezone {trimmed:?}"));
        let (sign, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (1, &trimmed[1..]),
            Some(b'-') => (-1, &trimmed[1..]),
            _ => return Err(invalid()),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
        let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }
        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(CalendarZone::Fixed)
            .ok_or_else(invalid)
    }

    pub fn utc() -> Self {
        CalendarZone::Fixed(Utc.fix())
    }

    fn sql_modifier(&self) -> String {
        match self {
            CalendarZone::Local => "localtime".to_string(),
            CalendarZone::Fixed(offset) => format!("{:+} seconds", offset.local_minus_utc()),
        }
    }
}

/// Normalizes a stored `date` value to whole seconds since 2001-01-01.
pub fn apple_seconds(timestamp: i64) -> i64 {
    if timestamp.abs() > NANOS_THRESHOLD {
        timestamp / 1_000_000_000
    } else {
        timestamp
    }
}

/// A zero date means the store never recorded one.
pub fn to_datetime(timestamp: i64, zone: CalendarZone) -> Option<DateTime<FixedOffset>> {
    if timestamp == 0 {
        return None;
    }
    let utc = DateTime::<Utc>::from_timestamp(apple_seconds(timestamp) + APPLE_EPOCH_OFFSET, 0)?;
    Some(match zone {
        CalendarZone::Local => utc.with_timezone(&Local).fixed_offset(),
        CalendarZone::Fixed(offset) => utc.with_timezone(&offset),
    })
}

pub fn to_iso(timestamp: i64, zone: CalendarZone) -> Option<String> {
    to_datetime(timestamp, zone).map(|dt| dt.to_rfc3339())
}

/// SQL fragment plus the values bound to its `?` placeholders, in order.
#[derive(Debug, Clone)]
pub struct DayPredicate {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayMatcher {
    month: u32,
    day: u32,
    zone: CalendarZone,
}

impl DayMatcher {
    pub fn new(month: u32, day: u32, zone: CalendarZone) -> Result<Self, CoreError> {
        if !(1..=12).contains(&month) {
            return Err(CoreError::InvalidArgument(format!("month {month} is not 1-12")));
        }
        // 2000 is a leap year, so any day that exists in some year exists here.
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            return Err(CoreError::InvalidArgument(format!("day {day} never occurs in month {month}")));
        }
        Ok(DayMatcher { month, day, zone })
    }

    pub fn today(zone: CalendarZone) -> Result<Self, CoreError> {
        let now = match zone {
            CalendarZone::Local => Local::now().fixed_offset(),
            CalendarZone::Fixed(offset) => Utc::now().with_timezone(&offset),
        };
        DayMatcher::new(now.month(), now.day(), zone)
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn zone(&self) -> CalendarZone {
        self.zone
    }

    pub fn matches(&self, timestamp: i64) -> bool {
        to_datetime(timestamp, self.zone)
            .map(|dt| dt.month() == self.month && dt.day() == self.day)
            .unwrap_or(false)
    }

    pub fn year_of(&self, timestamp: i64) -> Option<i32> {
        to_datetime(timestamp, self.zone).map(|dt| dt.year())
    }

    /// Pre-filter for `column`; rows it admits are still checked with `matches`.
    pub fn predicate(&self, column: &str) -> DayPredicate {
        let seconds = format!(
            "(CASE WHEN ABS({column}) > {NANOS_THRESHOLD} THEN {column} / 1000000000 ELSE {column} END)"
        );
        let sql = format!(
            "{column} != 0 \
             AND CAST(strftime('%m', {seconds} + {APPLE_EPOCH_OFFSET}, 'unixepoch', ?) AS INTEGER) = ? \
             AND CAST(strftime('%d', {seconds} + {APPLE_EPOCH_OFFSET}, 'unixepoch', ?) AS INTEGER) = ?"
        );
        let modifier = self.zone.sql_modifier();
        DayPredicate {
            sql,
            params: vec![
                Value::Text(modifier.clone()),
                Value::Integer(self.month as i64),
                Value::Text(modifier),
                Value::Integer(self.day as i64),
            ],
        }
    }
}
