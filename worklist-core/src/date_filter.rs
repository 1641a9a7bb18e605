//! Dynamic date filters: relative presets such as `today` or `last_7_days`
//! resolved against the current day into half-open date ranges.

use crate::error::{Result, WorklistError};
use crate::temporal::parse_temporal;
use chrono::{Datelike, Months, NaiveDate, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Longest `last_N_days` / `next_N_days` window, about a century
pub const MAX_ROLLING_DAYS: u32 = 36_600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DatePreset {
    Today,
    Yesterday,
    Tomorrow,
    ThisWeek,
    LastWeek,
    NextWeek,
    ThisMonth,
    LastMonth,
    NextMonth,
    ThisYear,
    LastYear,
    LastNDays(u32),
    NextNDays(u32),
    /// Strictly before today
    Overdue,
    /// Today or later
    Upcoming,
    Custom {
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
}

/// Half-open range `[start, end)`; a missing bound is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date < end)
    }

    /// Match a FHIR date/dateTime JSON value (arrays match when any element does)
    pub fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => parse_temporal(s).is_some_and(|t| self.contains(t.date())),
            Value::Array(items) => items.iter().any(|item| self.matches_value(item)),
            _ => false,
        }
    }
}

impl DatePreset {
    /// Resolve against `today`; weeks begin on `week_start`. Ranges that fall
    /// outside the representable calendar are an error.
    pub fn resolve(&self, today: NaiveDate, week_start: Weekday) -> Result<DateRange> {
        let overflow = || WorklistError::InvalidDateFilter(self.to_string());
        let shift = |from: NaiveDate, days: i64| {
            TimeDelta::try_days(days)
                .and_then(|delta| from.checked_add_signed(delta))
                .ok_or_else(overflow)
        };
        let months = |from: NaiveDate, n: i32| {
            let shifted = if n >= 0 {
                from.checked_add_months(Months::new(n.unsigned_abs()))
            } else {
                from.checked_sub_months(Months::new(n.unsigned_abs()))
            };
            shifted.ok_or_else(overflow)
        };
        let range = |start: NaiveDate, end: NaiveDate| DateRange {
            start: Some(start),
            end: Some(end),
        };

        let resolved = match self {
            DatePreset::Today => range(today, shift(today, 1)?),
            DatePreset::Yesterday => range(shift(today, -1)?, today),
            DatePreset::Tomorrow => range(shift(today, 1)?, shift(today, 2)?),
            DatePreset::ThisWeek | DatePreset::LastWeek | DatePreset::NextWeek => {
                let offset = (7 + today.weekday().num_days_from_monday()
                    - week_start.num_days_from_monday())
                    % 7;
                let this_week = shift(today, -(offset as i64))?;
                let start = match self {
                    DatePreset::LastWeek => shift(this_week, -7)?,
                    DatePreset::NextWeek => shift(this_week, 7)?,
                    _ => this_week,
                };
                range(start, shift(start, 7)?)
            }
            DatePreset::ThisMonth | DatePreset::LastMonth | DatePreset::NextMonth => {
                let first = today.with_day(1).unwrap_or(today);
                let start = match self {
                    DatePreset::LastMonth => months(first, -1)?,
                    DatePreset::NextMonth => months(first, 1)?,
                    _ => first,
                };
                range(start, months(start, 1)?)
            }
            DatePreset::ThisYear | DatePreset::LastYear => {
                let year = if *self == DatePreset::ThisYear {
                    today.year()
                } else {
                    today.year() - 1
                };
                let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(overflow)?;
                range(start, months(start, 12)?)
            }
            DatePreset::LastNDays(n) => range(shift(today, 1 - *n as i64)?, shift(today, 1)?),
            DatePreset::NextNDays(n) => range(today, shift(today, *n as i64)?),
            DatePreset::Overdue => DateRange {
                start: None,
                end: Some(today),
            },
            DatePreset::Upcoming => DateRange {
                start: Some(today),
                end: None,
            },
            DatePreset::Custom { from, to } => DateRange {
                start: *from,
                end: to.map(|d| shift(d, 1)).transpose()?,
            },
        };
        Ok(resolved)
    }
}

impl FromStr for DatePreset {
    type Err = WorklistError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || WorklistError::InvalidDateFilter(s.to_string());
        let preset = match s.trim() {
            "today" => DatePreset::Today,
            "yesterday" => DatePreset::Yesterday,
            "tomorrow" => DatePreset::Tomorrow,
            "this_week" => DatePreset::ThisWeek,
            "last_week" => DatePreset::LastWeek,
            "next_week" => DatePreset::NextWeek,
            "this_month" => DatePreset::ThisMonth,
            "last_month" => DatePreset::LastMonth,
            "next_month" => DatePreset::NextMonth,
            "this_year" => DatePreset::ThisYear,
            "last_year" => DatePreset::LastYear,
            "overdue" => DatePreset::Overdue,
            "upcoming" => DatePreset::Upcoming,
            other => {
                if let Some(rest) = other.strip_prefix("custom:") {
                    let (from, to) = rest.split_once("..").ok_or_else(invalid)?;
                    let bound = |text: &str| -> Result<Option<NaiveDate>> {
                        if text.is_empty() {
                            return Ok(None);
                        }
                        NaiveDate::parse_from_str(text, "%Y-%m-%d")
                            .map(Some)
                            .map_err(|_| invalid())
                    };
                    return Ok(DatePreset::Custom {
                        from: bound(from)?,
                        to: bound(to)?,
                    });
                }
                let days = |prefix: &str| {
                    other
                        .strip_prefix(prefix)
                        .and_then(|rest| rest.strip_suffix("_days"))
                        .and_then(|n| n.parse::<u32>().ok())
                        .filter(|n| (1..=MAX_ROLLING_DAYS).contains(n))
                };
                if let Some(n) = days("last_") {
                    DatePreset::LastNDays(n)
                } else if let Some(n) = days("next_") {
                    DatePreset::NextNDays(n)
                } else {
                    return Err(invalid());
                }
            }
        };
        Ok(preset)
    }
}

impl fmt::Display for DatePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePreset::Today => f.write_str("today"),
            DatePreset::Yesterday => f.write_str("yesterday"),
            DatePreset::Tomorrow => f.write_str("tomorrow"),
            DatePreset::ThisWeek => f.write_str("this_week"),
            DatePreset::LastWeek => f.write_str("last_week"),
            DatePreset::NextWeek => f.write_str("next_week"),
            DatePreset::ThisMonth => f.write_str("this_month"),
            DatePreset::LastMonth => f.write_str("last_month"),
            DatePreset::NextMonth => f.write_str("next_month"),
            DatePreset::ThisYear => f.write_str("this_year"),
            DatePreset::LastYear => f.write_str("last_year"),
            DatePreset::LastNDays(n) => write!(f, "last_{}_days", n),
            DatePreset::NextNDays(n) => write!(f, "next_{}_days", n),
            DatePreset::Overdue => f.write_str("overdue"),
            DatePreset::Upcoming => f.write_str("upcoming"),
            DatePreset::Custom { from, to } => {
                let show = |d: &Option<NaiveDate>| {
                    d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
                };
                write!(f, "custom:{}..{}", show(from), show(to))
            }
        }
    }
}

impl TryFrom<String> for DatePreset {
    type Error = WorklistError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DatePreset> for String {
    fn from(preset: DatePreset) -> Self {
        preset.to_string()
    }
}

/// Parse a weekday name such as `monday` or `Sun`
pub fn parse_week_start(name: &str) -> Result<Weekday> {
    name.parse::<Weekday>()
        .map_err(|_| WorklistError::validation(format!("unknown weekday '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // Friday
    fn today() -> NaiveDate {
        date(2024, 3, 15)
    }

    fn resolve(preset: &str) -> DateRange {
        preset
            .parse::<DatePreset>()
            .unwrap()
            .resolve(today(), Weekday::Mon)
            .unwrap()
    }

    #[test]
    fn test_single_days() {
        let r = resolve("today");
        assert!(r.contains(today()));
        assert!(!r.contains(date(2024, 3, 16)));
        assert!(!r.contains(date(2024, 3, 14)));

        assert_eq!(resolve("yesterday").start, Some(date(2024, 3, 14)));
        assert_eq!(resolve("tomorrow").end, Some(date(2024, 3, 17)));
    }

    #[test]
    fn test_weeks_follow_week_start() {
        let monday = resolve("this_week");
        assert_eq!(monday.start, Some(date(2024, 3, 11)));
        assert_eq!(monday.end, Some(date(2024, 3, 18)));

        let sunday = DatePreset::ThisWeek.resolve(today(), Weekday::Sun).unwrap();
        assert_eq!(sunday.start, Some(date(2024, 3, 10)));

        assert_eq!(resolve("last_week").start, Some(date(2024, 3, 4)));
        assert_eq!(resolve("next_week").start, Some(date(2024, 3, 18)));
    }

    #[test]
    fn test_week_start_on_the_same_day() {
        let r = DatePreset::ThisWeek.resolve(today(), Weekday::Fri).unwrap();
        assert_eq!(r.start, Some(today()));
    }

    #[test]
    fn test_months_and_years() {
        assert_eq!(resolve("this_month").start, Some(date(2024, 3, 1)));
        assert_eq!(resolve("this_month").end, Some(date(2024, 4, 1)));
        assert_eq!(resolve("last_month").start, Some(date(2024, 2, 1)));
        assert_eq!(resolve("next_month").end, Some(date(2024, 5, 1)));
        assert_eq!(resolve("last_year").start, Some(date(2023, 1, 1)));
        assert_eq!(resolve("this_year").end, Some(date(2025, 1, 1)));
    }

    #[test]
    fn test_rolling_windows_include_today() {
        let last = resolve("last_7_days");
        assert_eq!(last.start, Some(date(2024, 3, 9)));
        assert!(last.contains(today()));

        let next = resolve("next_30_days");
        assert_eq!(next.start, Some(today()));
        assert!(next.contains(date(2024, 4, 13)));
        assert!(!next.contains(date(2024, 4, 14)));
    }

    #[test]
    fn test_open_ranges() {
        let overdue = resolve("overdue");
        assert!(overdue.contains(date(1999, 1, 1)));
        assert!(!overdue.contains(today()));
        assert!(resolve("upcoming").contains(today()));
    }

    #[test]
    fn test_custom_range_is_inclusive_of_end_day() {
        let r = resolve("custom:2024-01-01..2024-01-31");
        assert!(r.contains(date(2024, 1, 31)));
        assert!(!r.contains(date(2024, 2, 1)));

        let open = resolve("custom:..2024-01-31");
        assert!(open.contains(date(1900, 1, 1)));
    }

    #[test]
    fn test_invalid_presets() {
        assert!("last_0_days".parse::<DatePreset>().is_err());
        assert!("someday".parse::<DatePreset>().is_err());
        assert!("custom:2024-01-01".parse::<DatePreset>().is_err());
    }

    #[test]
    fn test_windows_past_the_calendar_are_errors() {
        assert!("last_100000000_days".parse::<DatePreset>().is_err());
        assert!("next_36601_days".parse::<DatePreset>().is_err());
        assert_eq!(
            "last_36600_days".parse::<DatePreset>().unwrap(),
            DatePreset::LastNDays(36_600)
        );

        let huge = DatePreset::LastNDays(100_000_000);
        assert!(matches!(
            huge.resolve(today(), Weekday::Mon),
            Err(WorklistError::InvalidDateFilter(_))
        ));
        let ahead = DatePreset::NextNDays(u32::MAX);
        assert!(ahead.resolve(today(), Weekday::Mon).is_err());

        let end_of_time = NaiveDate::MAX;
        assert!(DatePreset::Today.resolve(end_of_time, Weekday::Mon).is_err());
        assert!(DatePreset::NextMonth.resolve(end_of_time, Weekday::Mon).is_err());
        let custom = DatePreset::Custom {
            from: None,
            to: Some(NaiveDate::MAX),
        };
        assert!(custom.resolve(today(), Weekday::Mon).is_err());
    }

    #[test]
    fn test_matches_datetime_values_by_day() {
        let r = resolve("today");
        assert!(r.matches_value(&json!("2024-03-15T23:59:00Z")));
        assert!(!r.matches_value(&json!("2024-03-16T00:00:00Z")));
        assert!(r.matches_value(&json!(["2020-01-01", "2024-03-15"])));
        assert!(!r.matches_value(&json!(null)));
    }

    #[test]
    fn test_serde_string_form() {
        let preset: DatePreset = serde_json::from_value(json!("next_14_days")).unwrap();
        assert_eq!(preset, DatePreset::NextNDays(14));
        assert_eq!(serde_json::to_value(&preset).unwrap(), json!("next_14_days"));
    }

    #[test]
    fn test_parse_week_start() {
        assert_eq!(parse_week_start("sunday").unwrap(), Weekday::Sun);
        assert!(parse_week_start("funday").is_err());
    }
}
