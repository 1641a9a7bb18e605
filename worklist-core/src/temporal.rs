//! FHIR date / dateTime values: parsing, calendar arithmetic and ordering

use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta,
    Timelike,
};
use std::cmp::Ordering;

use crate::error::{Result, WorklistError};

/// A date or datetime
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Temporal {
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

/// Calendar units accepted by the date functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Year,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
}

impl CalendarUnit {
    /// Parse a calendar keyword (`days`, `month`) or UCUM code (`d`, `mo`)
    pub fn parse(unit: &str) -> Option<Self> {
        match unit {
            "year" | "years" | "a" => Some(Self::Year),
            "month" | "months" | "mo" => Some(Self::Month),
            "week" | "weeks" | "wk" => Some(Self::Week),
            "day" | "days" | "d" => Some(Self::Day),
            "hour" | "hours" | "h" => Some(Self::Hour),
            "minute" | "minutes" | "min" => Some(Self::Minute),
            "second" | "seconds" | "s" => Some(Self::Second),
            "millisecond" | "milliseconds" | "ms" => Some(Self::Millisecond),
            _ => None,
        }
    }
}

/// Total-order key for sorting: calendar day (UTC for datetimes), dates
/// before datetimes on the same day, then the instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TemporalKey {
    day: NaiveDate,
    instant: Option<NaiveDateTime>,
}

impl Temporal {
    /// Calendar day of the value (datetimes use their own offset)
    pub fn date(&self) -> NaiveDate {
        match self {
            Temporal::Date(d) => *d,
            Temporal::DateTime(dt) => dt.date_naive(),
        }
    }

    /// Instant of the value; dates are taken at midnight UTC
    fn naive_utc(&self) -> NaiveDateTime {
        match self {
            Temporal::Date(d) => d.and_time(NaiveTime::MIN),
            Temporal::DateTime(dt) => dt.naive_utc(),
        }
    }

    /// Filter comparison: two datetimes compare as instants, anything else by calendar day
    pub fn compare(&self, other: &Temporal) -> Ordering {
        match (self, other) {
            (Temporal::DateTime(a), Temporal::DateTime(b)) => a.cmp(b),
            _ => self.date().cmp(&other.date()),
        }
    }

    pub fn sort_key(&self) -> TemporalKey {
        match self {
            Temporal::Date(d) => TemporalKey {
                day: *d,
                instant: None,
            },
            Temporal::DateTime(dt) => {
                let instant = dt.naive_utc();
                TemporalKey {
                    day: instant.date(),
                    instant: Some(instant),
                }
            }
        }
    }

    /// Shift by `amount` calendar units; month arithmetic clamps to the end of the month
    pub fn shift(&self, amount: i64, unit: CalendarUnit) -> Result<Temporal> {
        let overflow = || WorklistError::eval("date arithmetic overflow");
        let months = |per: i64| amount.checked_mul(per).ok_or_else(overflow);
        match self {
            Temporal::Date(d) => {
                let shifted = match unit {
                    CalendarUnit::Year => shift_months(*d, months(12)?),
                    CalendarUnit::Month => shift_months(*d, amount),
                    CalendarUnit::Week => TimeDelta::try_weeks(amount).and_then(|t| d.checked_add_signed(t)),
                    CalendarUnit::Day => TimeDelta::try_days(amount).and_then(|t| d.checked_add_signed(t)),
                    // Sub-day units only move a date by whole days
                    CalendarUnit::Hour => TimeDelta::try_days(amount / 24).and_then(|t| d.checked_add_signed(t)),
                    CalendarUnit::Minute | CalendarUnit::Second | CalendarUnit::Millisecond => Some(*d),
                };
                shifted.map(Temporal::Date).ok_or_else(overflow)
            }
            Temporal::DateTime(dt) => {
                let delta = match unit {
                    CalendarUnit::Year => return shift_months(*dt, months(12)?).map(Temporal::DateTime).ok_or_else(overflow),
                    CalendarUnit::Month => return shift_months(*dt, amount).map(Temporal::DateTime).ok_or_else(overflow),
                    CalendarUnit::Week => TimeDelta::try_weeks(amount),
                    CalendarUnit::Day => TimeDelta::try_days(amount),
                    CalendarUnit::Hour => TimeDelta::try_hours(amount),
                    CalendarUnit::Minute => TimeDelta::try_minutes(amount),
                    CalendarUnit::Second => TimeDelta::try_seconds(amount),
                    CalendarUnit::Millisecond => TimeDelta::try_milliseconds(amount),
                };
                delta
                    .and_then(|t| dt.checked_add_signed(t))
                    .map(Temporal::DateTime)
                    .ok_or_else(overflow)
            }
        }
    }

    /// Whole units elapsed from `self` to `other`, truncated toward zero
    pub fn diff(&self, other: &Temporal, unit: CalendarUnit) -> i64 {
        let start = self.naive_utc();
        let end = other.naive_utc();
        match unit {
            CalendarUnit::Year => months_between(start, end) / 12,
            CalendarUnit::Month => months_between(start, end),
            _ => {
                let delta = end - start;
                match unit {
                    CalendarUnit::Week => delta.num_weeks(),
                    CalendarUnit::Day => delta.num_days(),
                    CalendarUnit::Hour => delta.num_hours(),
                    CalendarUnit::Minute => delta.num_minutes(),
                    CalendarUnit::Second => delta.num_seconds(),
                    _ => delta.num_milliseconds(),
                }
            }
        }
    }

    /// FHIR string form: `YYYY-MM-DD` or RFC 3339
    pub fn to_fhir_string(&self) -> String {
        match self {
            Temporal::Date(d) => d.format("%Y-%m-%d").to_string(),
            Temporal::DateTime(dt) => format_datetime(dt),
        }
    }
}

trait MonthShift: Sized {
    fn add_months(self, months: Months) -> Option<Self>;
    fn sub_months(self, months: Months) -> Option<Self>;
}

impl MonthShift for NaiveDate {
    fn add_months(self, months: Months) -> Option<Self> {
        self.checked_add_months(months)
    }
    fn sub_months(self, months: Months) -> Option<Self> {
        self.checked_sub_months(months)
    }
}

impl MonthShift for DateTime<FixedOffset> {
    fn add_months(self, months: Months) -> Option<Self> {
        self.checked_add_months(months)
    }
    fn sub_months(self, months: Months) -> Option<Self> {
        self.checked_sub_months(months)
    }
}

fn shift_months<T: MonthShift>(value: T, months: i64) -> Option<T> {
    let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
    if months >= 0 {
        value.add_months(Months::new(magnitude))
    } else {
        value.sub_months(Months::new(magnitude))
    }
}

fn months_between(start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    let mut months = (end.year() as i64 - start.year() as i64) * 12
        + (end.month() as i64 - start.month() as i64);
    let start_key = (start.day(), start.num_seconds_from_midnight());
    let end_key = (end.day(), end.num_seconds_from_midnight());
    if months > 0 && end_key < start_key {
        months -= 1;
    } else if months < 0 && end_key > start_key {
        months += 1;
    }
    months
}

pub fn format_datetime(dt: &DateTime<FixedOffset>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

/// Parse a FHIR `date`: `YYYY`, `YYYY-MM` or `YYYY-MM-DD` (partial dates take the first day)
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if !s.as_bytes().first().is_some_and(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.len() {
        4 => NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1),
        7 => NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d").ok(),
        10 => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok(),
        _ => None,
    }
}

/// Parse a FHIR `dateTime` / `instant`; values without an offset are taken as UTC
pub fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    if s.len() < 16 || s.as_bytes().get(10) != Some(&b'T') {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let normalized = match s.strip_suffix('Z') {
        Some(rest) => format!("{}+00:00", rest),
        None => s.to_string(),
    };
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    None
}

/// Parse either a date or a datetime string
pub fn parse_temporal(s: &str) -> Option<Temporal> {
    if s.len() <= 10 {
        parse_date(s).map(Temporal::Date)
    } else {
        parse_datetime(s).map(Temporal::DateTime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> Temporal {
        parse_temporal(s).unwrap()
    }

    #[test]
    fn test_parse_partial_dates() {
        assert_eq!(parse_date("2024"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parse_date("2024-02"), NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(parse_date("soon"), None);
        assert!(parse_datetime("2024-01-10T08:00").is_some());
        assert!(parse_datetime("2024-01-10T08:00:00+02:00").is_some());
    }

    #[test]
    fn test_month_shift_clamps() {
        let shifted = date("2024-01-31").shift(1, CalendarUnit::Month).unwrap();
        assert_eq!(shifted.to_fhir_string(), "2024-02-29");
        let back = date("2024-03-15T10:00:00Z").shift(-2, CalendarUnit::Hour).unwrap();
        assert_eq!(back.to_fhir_string(), "2024-03-15T08:00:00Z");
    }

    #[test]
    fn test_huge_shifts_are_errors() {
        let today = date("2024-03-15");
        assert!(today.shift(999_999_999_999_999_999, CalendarUnit::Year).is_err());
        assert!(today.shift(i64::MIN, CalendarUnit::Year).is_err());
        assert!(today.shift(i64::MAX, CalendarUnit::Day).is_err());
        assert!(date("2024-03-15T10:00:00Z").shift(i64::MAX, CalendarUnit::Millisecond).is_err());
    }

    #[test]
    fn test_diff_truncates() {
        let start = date("2024-01-31");
        assert_eq!(start.diff(&date("2024-02-29"), CalendarUnit::Month), 0);
        assert_eq!(start.diff(&date("2024-03-31"), CalendarUnit::Month), 2);
        assert_eq!(date("1990-03-20").diff(&date("2024-03-15"), CalendarUnit::Year), 33);
    }

    #[test]
    fn test_sort_key_is_a_total_order() {
        let mut values: Vec<Temporal> = [
            "2024-01-10T23:00:00Z",
            "2024-01-10",
            "2024-01-10T01:00:00Z",
            "2024-01-09T12:00:00Z",
            "2024-01-11",
            "2024-01-10T12:00:00Z",
        ]
        .iter()
        .map(|s| date(s))
        .collect();
        values.sort_by_key(Temporal::sort_key);
        let sorted: Vec<String> = values.iter().map(Temporal::to_fhir_string).collect();
        assert_eq!(
            sorted,
            vec![
                "2024-01-09T12:00:00Z",
                "2024-01-10",
                "2024-01-10T01:00:00Z",
                "2024-01-10T12:00:00Z",
                "2024-01-10T23:00:00Z",
                "2024-01-11",
            ]
        );
    }

    #[test]
    fn test_sort_key_uses_utc_day_for_offsets() {
        // 2024-01-11 01:00 at +05:00 is 2024-01-10 20:00 UTC
        let shifted = date("2024-01-11T01:00:00+05:00");
        assert!(shifted.sort_key() < date("2024-01-11").sort_key());
        assert!(shifted.sort_key() > date("2024-01-10T19:00:00Z").sort_key());
    }
}
