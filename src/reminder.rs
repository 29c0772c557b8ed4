// src/reminder.rs
//
// Cron-triggered reminder sweep. For each tenant, the active period's
// weekend-adjusted days-left must hit one of the fixed thresholds before
// anything is dispatched, which makes a same-day re-run recompute the same
// trigger decision. Dispatch itself is at-least-once: there is no sent
// ledger, and a retried run may deliver duplicates.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::deadline::{self, DeadlineAssessment};
use crate::period::{self, Period};
use crate::store::{
    DelegationReader, EmployeeDirectory, EmployeeRecord, NotificationDispatcher, NotificationKind,
    StoreError, TenantConfig, TenantConfigReader, TimesheetReader, TimesheetStatus,
};
use crate::timezone::resolve_tz;

/// Days-remaining values that trigger a reminder pass for a tenant.
pub static REMINDER_THRESHOLDS: Lazy<HashSet<i64>> =
    Lazy::new(|| [7, 5, 3, 2, 1, 0].into_iter().collect());

/// Time budget for one tenant's reminder pass.
const TENANT_BUDGET: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct ReminderRun {
    pub tenant_id: String,
    pub days_left: i64,
    pub sent_employees: usize,
    pub sent_managers: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderSweepReport {
    pub runs: Vec<ReminderRun>,
    pub skipped_tenants: usize,
    pub failed_tenants: usize,
    pub total_employees_notified: usize,
    pub total_managers_notified: usize,
}

pub struct ReminderScheduler {
    tenants: Arc<dyn TenantConfigReader>,
    employees: Arc<dyn EmployeeDirectory>,
    timesheets: Arc<dyn TimesheetReader>,
    delegations: Arc<dyn DelegationReader>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl ReminderScheduler {
    pub fn new(
        tenants: Arc<dyn TenantConfigReader>,
        employees: Arc<dyn EmployeeDirectory>,
        timesheets: Arc<dyn TimesheetReader>,
        delegations: Arc<dyn DelegationReader>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            tenants,
            employees,
            timesheets,
            delegations,
            dispatcher,
        }
    }

    /// Sweep over all tenants. A fetch error for one tenant is logged and
    /// that tenant skipped; the run itself never fails. `force` bypasses the
    /// trigger-day gate for operational testing.
    pub async fn run_sweep(&self, now_utc: DateTime<Utc>, force: bool) -> ReminderSweepReport {
        let mut report = ReminderSweepReport::default();
        let tenants = match self.tenants.list().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Reminder sweep aborted, tenant listing failed: {}", e);
                return report;
            }
        };

        for config in tenants {
            let tenant_id = config.tenant_id.clone();
            match timeout(TENANT_BUDGET, self.run_tenant(&config, now_utc, force)).await {
                Ok(Ok(Some(run))) => {
                    report.total_employees_notified += run.sent_employees;
                    report.total_managers_notified += run.sent_managers;
                    report.runs.push(run);
                }
                Ok(Ok(None)) => report.skipped_tenants += 1,
                Ok(Err(e)) => {
                    error!("Reminder sweep failed for tenant {}: {}", tenant_id, e);
                    report.failed_tenants += 1;
                }
                Err(_) => {
                    error!("Reminder sweep exceeded time budget for tenant {}", tenant_id);
                    report.failed_tenants += 1;
                }
            }
        }

        info!(
            "Reminder sweep finished: {} runs, {} employees and {} managers notified, {} skipped, {} failed",
            report.runs.len(),
            report.total_employees_notified,
            report.total_managers_notified,
            report.skipped_tenants,
            report.failed_tenants
        );
        report
    }

    /// Returns Ok(None) when today is not a trigger day for the tenant.
    async fn run_tenant(
        &self,
        config: &TenantConfig,
        now_utc: DateTime<Utc>,
        force: bool,
    ) -> Result<Option<ReminderRun>, StoreError> {
        let tz = resolve_tz(&config.timezone)?;
        let active_period = period::compute_period(tz, config.deadline_day, now_utc);
        let assessment = deadline::assess_effective(&active_period, tz, now_utc);
        let days_left = assessment.days_until_deadline;

        if !force && !REMINDER_THRESHOLDS.contains(&days_left) {
            debug!(
                "Tenant {}: {} days left, not a trigger day",
                config.tenant_id, days_left
            );
            return Ok(None);
        }

        let pending = self.pending_employees(config, &active_period).await?;
        if pending.is_empty() {
            info!("Tenant {}: no pending employees", config.tenant_id);
            return Ok(Some(ReminderRun {
                tenant_id: config.tenant_id.clone(),
                days_left,
                sent_employees: 0,
                sent_managers: 0,
            }));
        }

        let sent_employees = self
            .notify_employees(&pending, &active_period, &assessment)
            .await;
        let sent_managers = self
            .notify_managers(&pending, &active_period, &assessment)
            .await;

        info!(
            "Tenant {}: {} days left, reminded {} employees and {} managers",
            config.tenant_id, days_left, sent_employees, sent_managers
        );
        Ok(Some(ReminderRun {
            tenant_id: config.tenant_id.clone(),
            days_left,
            sent_employees,
            sent_managers,
        }))
    }

    /// Pending set for the period: draft, rejected, and entirely missing
    /// timesheets, de-duplicated.
    async fn pending_employees(
        &self,
        config: &TenantConfig,
        active_period: &Period,
    ) -> Result<Vec<EmployeeRecord>, StoreError> {
        let rows = self
            .timesheets
            .list_by_tenant_and_period(&config.tenant_id, active_period.start)
            .await?;
        let status_by_employee: HashMap<String, TimesheetStatus> = rows
            .into_iter()
            .map(|row| (row.employee_id, row.status))
            .collect();

        let all = self.employees.list_by_tenant(&config.tenant_id).await?;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for employee in all {
            let is_pending = match status_by_employee.get(&employee.employee_id) {
                None => true,
                Some(TimesheetStatus::Draft) | Some(TimesheetStatus::Rejected) => true,
                Some(TimesheetStatus::Submitted) | Some(TimesheetStatus::Approved) => false,
            };
            if is_pending && seen.insert(employee.employee_id.clone()) {
                pending.push(employee);
            }
        }
        Ok(pending)
    }

    /// One reminder per pending employee, best effort.
    async fn notify_employees(
        &self,
        pending: &[EmployeeRecord],
        active_period: &Period,
        assessment: &DeadlineAssessment,
    ) -> usize {
        let mut sent = 0;
        for employee in pending {
            let payload = json!({
                "period": active_period.label,
                "period_key": active_period.key,
                "days_left": assessment.days_until_deadline,
                "deadline": assessment.effective_deadline,
                "overdue": assessment.is_overdue,
            });
            match self
                .dispatcher
                .send(NotificationKind::EmployeeReminder, &employee.employee_id, payload)
                .await
            {
                Ok(()) => sent += 1,
                Err(e) => warn!(
                    "Reminder dispatch failed for employee {}: {}",
                    employee.employee_id, e
                ),
            }
        }
        sent
    }

    /// One consolidated digest per manager with delegated visibility over at
    /// least one pending employee.
    async fn notify_managers(
        &self,
        pending: &[EmployeeRecord],
        active_period: &Period,
        assessment: &DeadlineAssessment,
    ) -> usize {
        let pending_ids: Vec<String> =
            pending.iter().map(|e| e.employee_id.clone()).collect();
        let groups = match self.delegations.managers_for_employees(&pending_ids).await {
            Ok(groups) => groups,
            Err(e) => {
                warn!("Delegation lookup failed: {}", e);
                return 0;
            }
        };

        let name_by_id: HashMap<&str, &str> = pending
            .iter()
            .map(|e| (e.employee_id.as_str(), e.name.as_str()))
            .collect();

        let mut sent = 0;
        for (manager_id, employee_ids) in groups {
            let mut names: Vec<&str> = employee_ids
                .iter()
                .filter_map(|id| name_by_id.get(id.as_str()).copied())
                .collect();
            if names.is_empty() {
                continue;
            }
            names.sort_unstable();
            let payload = json!({
                "period": active_period.label,
                "days_left": assessment.days_until_deadline,
                "pending_employees": names,
            });
            match self
                .dispatcher
                .send(NotificationKind::ManagerDigest, &manager_id, payload)
                .await
            {
                Ok(()) => sent += 1,
                Err(e) => warn!("Digest dispatch failed for manager {}: {}", manager_id, e),
            }
        }
        sent
    }
}
