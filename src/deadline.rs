// src/deadline.rs
//
// Urgency classification for a period's deadline, measured in tenant-local
// calendar days. Two variants exist on purpose: `assess` counts against the
// raw period end, `assess_effective` against a weekend-adjusted effective
// deadline (Saturday/Sunday roll back to the preceding Friday). The reminder
// scheduler uses the effective variant; lock timing uses the raw dates.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::Serialize;

use crate::period::Period;
use crate::timezone::local_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlineAssessment {
    /// Whole tenant-local days until the deadline; negative means overdue.
    pub days_until_deadline: i64,
    pub is_overdue: bool,
    pub urgency: UrgencyLevel,
    /// The date the days were counted against.
    pub effective_deadline: NaiveDate,
}

/// Roll a deadline landing on a weekend back to the preceding Friday.
pub fn weekend_adjusted(deadline: NaiveDate) -> NaiveDate {
    match deadline.weekday() {
        Weekday::Sat => deadline - Duration::days(1),
        Weekday::Sun => deadline - Duration::days(2),
        _ => deadline,
    }
}

pub fn urgency_for(days_left: i64) -> UrgencyLevel {
    if days_left <= 1 {
        UrgencyLevel::Critical
    } else if days_left <= 3 {
        UrgencyLevel::High
    } else if days_left <= 7 {
        UrgencyLevel::Medium
    } else {
        UrgencyLevel::Low
    }
}

fn assess_against(deadline: NaiveDate, tz: Tz, now_utc: DateTime<Utc>) -> DeadlineAssessment {
    let today = local_date(tz, now_utc);
    let days = (deadline - today).num_days();
    DeadlineAssessment {
        days_until_deadline: days,
        is_overdue: days < 0,
        urgency: urgency_for(days),
        effective_deadline: deadline,
    }
}

/// Days left measured against the raw period end.
pub fn assess(period: &Period, tz: Tz, now_utc: DateTime<Utc>) -> DeadlineAssessment {
    assess_against(period.end, tz, now_utc)
}

/// Days left measured against the weekend-adjusted effective deadline.
pub fn assess_effective(period: &Period, tz: Tz, now_utc: DateTime<Utc>) -> DeadlineAssessment {
    assess_against(weekend_adjusted(period.end), tz, now_utc)
}
