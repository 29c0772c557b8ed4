// src/timezone.rs
//
// Tenant-local date arithmetic. Every tenant carries an IANA timezone name;
// all deadline decisions are made against that zone's calendar date, never
// against the server clock.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown IANA timezone: {0}")]
    UnknownTimezone(String),
    #[error("Deadline day {0} outside supported range 0..=28")]
    DeadlineDayOutOfRange(u8),
}

pub fn resolve_tz(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|_| ConfigError::UnknownTimezone(name.to_string()))
}

/// The calendar date "now" as seen from the given zone.
pub fn local_date(tz: Tz, now_utc: DateTime<Utc>) -> NaiveDate {
    now_utc.with_timezone(&tz).date_naive()
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(date)
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Number of Monday-Friday days in the calendar month containing `date`.
pub fn working_days_in_month(date: NaiveDate) -> u32 {
    let first = first_of_month(date);
    first
        .iter_days()
        .take_while(|d| d.month() == first.month() && d.year() == first.year())
        .filter(|d| !is_weekend(*d))
        .count() as u32
}
