// src/pending.rs
//
// Per-employee pending status: how far along the current period is, plus a
// bounded history of unresolved prior periods. Computed on demand, never
// persisted. The history walk is floored at the first of the employee's
// creation month so new hires never see "overdue" noise for periods that
// predate them.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::deadline::{self, DeadlineAssessment, UrgencyLevel};
use crate::period::{self, Period};
use crate::store::{
    EmployeeRecord, StoreError, TenantConfig, TimesheetReader, TimesheetRow, TimesheetStatus,
};
use crate::timezone::{first_of_month, local_date, resolve_tz, working_days_in_month};

/// How many prior periods the history walk covers.
pub const HISTORY_DEPTH: usize = 6;
/// Day of the month after a period's start month on which an unresolved
/// prior period starts counting as overdue. Deliberately independent of the
/// tenant's configured deadline day.
pub const HISTORY_OVERDUE_DAY: u32 = 5;
/// Draft completion at or above this percentage reads as "near complete".
const NEAR_COMPLETE_PCT: u32 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusMessageKey {
    DraftEmpty,
    DraftPartial,
    DraftNearComplete,
    Submitted,
    Approved,
    Rejected,
    MissingOverdue,
    MissingDueSoon,
    MissingOpen,
}

impl StatusMessageKey {
    pub fn text(self) -> &'static str {
        match self {
            Self::DraftEmpty => "Your timesheet for this period is still empty.",
            Self::DraftPartial => "Your timesheet is in progress; keep your entries up to date.",
            Self::DraftNearComplete => "Your timesheet is almost complete; remember to submit it.",
            Self::Submitted => "Your timesheet has been submitted and is awaiting approval.",
            Self::Approved => "Your timesheet for this period is approved.",
            Self::Rejected => "Your timesheet was rejected; please correct and resubmit it.",
            Self::MissingOverdue => "The reporting deadline has passed and no timesheet exists.",
            Self::MissingDueSoon => "The reporting deadline is close and no timesheet exists yet.",
            Self::MissingOpen => "No timesheet exists for the current period yet.",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentPeriodStatus {
    pub period: Period,
    pub has_timesheet: bool,
    pub status: Option<TimesheetStatus>,
    pub completion_percentage: u32,
    pub message: StatusMessageKey,
    pub message_text: String,
    pub assessment: DeadlineAssessment,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoricalPeriodStatus {
    pub period: Period,
    pub has_timesheet: bool,
    /// None reads as "pending": no timesheet row exists for the period.
    pub status: Option<TimesheetStatus>,
    pub is_overdue: bool,
}

impl HistoricalPeriodStatus {
    pub fn is_resolved(&self) -> bool {
        self.status.is_some_and(|s| s.is_resolved())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingSummary {
    pub total_pending: usize,
    pub overdue_count: usize,
    pub next_deadline: NaiveDate,
    pub overall_urgency: UrgencyLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmployeePendingSnapshot {
    pub employee_id: String,
    pub current: CurrentPeriodStatus,
    pub historical_pending: Vec<HistoricalPeriodStatus>,
    pub summary: PendingSummary,
}

pub struct PendingStatusAggregator {
    timesheets: Arc<dyn TimesheetReader>,
}

impl PendingStatusAggregator {
    pub fn new(timesheets: Arc<dyn TimesheetReader>) -> Self {
        Self { timesheets }
    }

    pub async fn compute_snapshot(
        &self,
        employee: &EmployeeRecord,
        config: &TenantConfig,
        now_utc: DateTime<Utc>,
    ) -> Result<EmployeePendingSnapshot, StoreError> {
        let tz = resolve_tz(&config.timezone)?;
        let current_period = period::compute_period(tz, config.deadline_day, now_utc);
        let assessment = deadline::assess_effective(&current_period, tz, now_utc);

        let row = self
            .timesheets
            .find_by_employee_and_period(&employee.employee_id, current_period.start)
            .await?;
        let current = Self::current_status(current_period.clone(), row, assessment);

        let historical = self
            .historical_pending(employee, config.deadline_day, &current_period, tz, now_utc)
            .await?;
        let summary = Self::summarize(&current, &historical);

        Ok(EmployeePendingSnapshot {
            employee_id: employee.employee_id.clone(),
            current,
            historical_pending: historical,
            summary,
        })
    }

    fn current_status(
        period: Period,
        row: Option<TimesheetRow>,
        assessment: DeadlineAssessment,
    ) -> CurrentPeriodStatus {
        match row {
            Some(row) => {
                let working_days = working_days_in_month(period.start).max(1);
                let pct = ((f64::from(row.entry_count) / f64::from(working_days)) * 100.0)
                    .round() as u32;
                let pct = pct.min(100);
                let message = match row.status {
                    TimesheetStatus::Draft if pct == 0 => StatusMessageKey::DraftEmpty,
                    TimesheetStatus::Draft if pct >= NEAR_COMPLETE_PCT => {
                        StatusMessageKey::DraftNearComplete
                    }
                    TimesheetStatus::Draft => StatusMessageKey::DraftPartial,
                    TimesheetStatus::Submitted => StatusMessageKey::Submitted,
                    TimesheetStatus::Approved => StatusMessageKey::Approved,
                    TimesheetStatus::Rejected => StatusMessageKey::Rejected,
                };
                CurrentPeriodStatus {
                    period,
                    has_timesheet: true,
                    status: Some(row.status),
                    completion_percentage: pct,
                    message,
                    message_text: message.text().to_string(),
                    assessment,
                }
            }
            None => {
                let message = if assessment.is_overdue {
                    StatusMessageKey::MissingOverdue
                } else if assessment.days_until_deadline <= 3 {
                    StatusMessageKey::MissingDueSoon
                } else {
                    StatusMessageKey::MissingOpen
                };
                CurrentPeriodStatus {
                    period,
                    has_timesheet: false,
                    status: None,
                    completion_percentage: 0,
                    message,
                    message_text: message.text().to_string(),
                    assessment,
                }
            }
        }
    }

    /// Walks backward from the current period, newest first, stopping at
    /// HISTORY_DEPTH periods or the employee's creation-month floor. All
    /// timesheets for the covered range come back in one query.
    async fn historical_pending(
        &self,
        employee: &EmployeeRecord,
        deadline_day: u8,
        current: &Period,
        tz: Tz,
        now_utc: DateTime<Utc>,
    ) -> Result<Vec<HistoricalPeriodStatus>, StoreError> {
        let floor = first_of_month(employee.created_at);

        let mut periods = Vec::new();
        let mut cursor = current.clone();
        for _ in 0..HISTORY_DEPTH {
            let Some(prev) = period::previous_period(&cursor, deadline_day) else {
                break;
            };
            if prev.start < floor {
                break;
            }
            cursor = prev.clone();
            periods.push(prev);
        }
        if periods.is_empty() {
            return Ok(Vec::new());
        }

        let oldest = periods[periods.len() - 1].start;
        let newest = periods[0].start;
        let rows = self
            .timesheets
            .list_by_employee_in_range(&employee.employee_id, oldest, newest)
            .await?;
        let by_start: HashMap<NaiveDate, TimesheetRow> =
            rows.into_iter().map(|r| (r.period_start, r)).collect();

        let today = local_date(tz, now_utc);
        Ok(periods
            .into_iter()
            .map(|p| {
                let row = by_start.get(&p.start);
                HistoricalPeriodStatus {
                    is_overdue: today > Self::history_deadline(&p),
                    has_timesheet: row.is_some(),
                    status: row.map(|r| r.status),
                    period: p,
                }
            })
            .collect())
    }

    /// Fixed rule: a prior period is due by day 5 of the month after its
    /// start month.
    fn history_deadline(period: &Period) -> NaiveDate {
        let next_month = first_of_month(period.start)
            .checked_add_months(Months::new(1))
            .unwrap_or(period.start);
        next_month.with_day(HISTORY_OVERDUE_DAY).unwrap_or(next_month)
    }

    fn summarize(
        current: &CurrentPeriodStatus,
        historical: &[HistoricalPeriodStatus],
    ) -> PendingSummary {
        let total_pending = historical.iter().filter(|h| !h.is_resolved()).count();
        let overdue_count = historical
            .iter()
            .filter(|h| !h.is_resolved() && h.is_overdue)
            .count();

        let overall_urgency = if current.assessment.urgency == UrgencyLevel::Critical {
            UrgencyLevel::Critical
        } else if total_pending > 0 && current.assessment.urgency == UrgencyLevel::High {
            UrgencyLevel::High
        } else if total_pending > 2 {
            UrgencyLevel::Medium
        } else {
            UrgencyLevel::Low
        };

        PendingSummary {
            total_pending,
            overdue_count,
            next_deadline: current.period.end,
            overall_urgency,
        }
    }
}
