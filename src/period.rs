// src/period.rs
//
// Reporting-period boundaries. A tenant's "deadline day" (1..=28) splits the
// calendar into periods running from that day of one month to the day before
// it in the next; day 0 means plain calendar months. Periods are derived
// values: they are recomputed from config plus a reference instant and never
// stored.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::timezone::{first_of_month, last_day_of_month, local_date};

/// Sentinel deadline day meaning "use full calendar months".
pub const CALENDAR_MONTH: u8 = 0;
/// Highest deadline day that exists in every month.
pub const MAX_DEADLINE_DAY: u8 = 28;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Period {
    /// First day, inclusive.
    pub start: NaiveDate,
    /// Last day, inclusive.
    pub end: NaiveDate,
    /// Year-month of `start`, e.g. "2025-09".
    pub key: String,
    pub label: String,
}

impl Period {
    fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start,
            end,
            key: start.format("%Y-%m").to_string(),
            label: format!(
                "{} - {}",
                start.format("%b %-d, %Y"),
                end.format("%b %-d, %Y")
            ),
        }
    }
}

/// The period containing `reference`, evaluated against the tenant-local
/// calendar date. The hour carried by `reference` never changes the result.
pub fn compute_period(tz: Tz, deadline_day: u8, reference: DateTime<Utc>) -> Period {
    period_for_local_date(deadline_day, local_date(tz, reference))
}

/// The period containing an already-localized calendar date.
pub fn period_for_local_date(deadline_day: u8, date: NaiveDate) -> Period {
    if (1..=MAX_DEADLINE_DAY).contains(&deadline_day) {
        let day = u32::from(deadline_day);
        let anchor = if date.day() >= day {
            first_of_month(date)
        } else {
            first_of_month(date)
                .checked_sub_months(Months::new(1))
                .unwrap_or_else(|| first_of_month(date))
        };
        // Day is at most 28, so it exists in every anchor month.
        let start = anchor.with_day(day).unwrap_or(anchor);
        let end = start
            .checked_add_months(Months::new(1))
            .and_then(|d| d.pred_opt())
            .unwrap_or(start);
        Period::new(start, end)
    } else {
        // Day 0 and out-of-range values both resolve to calendar months.
        Period::new(first_of_month(date), last_day_of_month(date))
    }
}

/// The period immediately before `period` under the same deadline day.
pub fn previous_period(period: &Period, deadline_day: u8) -> Option<Period> {
    period
        .start
        .pred_opt()
        .map(|d| period_for_local_date(deadline_day, d))
}

/// Lazy, chronologically ordered sequence of periods covering the requested
/// range. Pure function of its inputs; restartable.
pub fn enumerate_periods(
    tz: Tz,
    deadline_day: u8,
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> impl Iterator<Item = Period> {
    enumerate_periods_local(
        deadline_day,
        local_date(tz, range_start),
        local_date(tz, range_end),
    )
}

pub fn enumerate_periods_local(
    deadline_day: u8,
    range_start: NaiveDate,
    range_end: NaiveDate,
) -> impl Iterator<Item = Period> {
    let first = period_for_local_date(deadline_day, range_start);
    std::iter::successors(Some(first), move |p| {
        p.end
            .succ_opt()
            .map(|next| period_for_local_date(deadline_day, next))
    })
    .take_while(move |p| p.start <= range_end)
}
