// src/lock.rs
//
// Period auto-locking. Once a tenant's deadline day for the current month
// has passed, the previous calendar month is locked against further edits.
// The lock decision deliberately uses a plain month rule (day N of the
// current month, previous month as target) rather than the deadline-day
// period boundaries; the two rules coexist in this system.
//
// State machine per (tenant, period): Unlocked -> Locked. The automatic
// path never unlocks; manual administrator overrides may.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

use crate::store::{LockStore, StoreError, TenantConfig, TenantConfigReader};
use crate::timezone::{first_of_month, last_day_of_month, local_date, resolve_tz};

/// Time budget for one tenant's lock decision. A slow tenant is recorded as
/// an error and the sweep moves on.
const TENANT_BUDGET: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockOutcome {
    /// First lock of this period.
    Locked,
    /// An existing unlocked row was flipped to locked.
    Updated,
    AlreadyLocked,
    /// Deadline for the current month has not passed yet.
    NotYet,
    /// Tenant has auto-lock disabled.
    Skipped,
    Error(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantLockReport {
    pub tenant_id: String,
    pub period_start: Option<NaiveDate>,
    pub outcome: LockOutcome,
}

pub struct PeriodLockManager {
    tenants: Arc<dyn TenantConfigReader>,
    locks: Arc<dyn LockStore>,
}

impl PeriodLockManager {
    pub fn new(tenants: Arc<dyn TenantConfigReader>, locks: Arc<dyn LockStore>) -> Self {
        Self { tenants, locks }
    }

    /// Deadline date the lock gate compares `today` against. For a
    /// configured day this is that day in the current month. For
    /// calendar-month tenants (day 0) it is the end of the previous month:
    /// the month that just finished is due immediately, and comparing
    /// against the current month's end would never fire.
    fn current_month_deadline(deadline_day: u8, today: NaiveDate) -> NaiveDate {
        if (1..=crate::period::MAX_DEADLINE_DAY).contains(&deadline_day) {
            first_of_month(today)
                .with_day(u32::from(deadline_day))
                .unwrap_or(today)
        } else {
            last_day_of_month(Self::previous_month_start(today))
        }
    }

    /// First day of the month before the one containing `today`.
    fn previous_month_start(today: NaiveDate) -> NaiveDate {
        first_of_month(today)
            .checked_sub_months(Months::new(1))
            .unwrap_or_else(|| first_of_month(today))
    }

    /// Daily sweep over all tenants. One tenant failing never aborts the
    /// others; every tenant ends up in the report.
    pub async fn sweep(&self, now_utc: DateTime<Utc>) -> Vec<TenantLockReport> {
        let tenants = match self.tenants.list().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Lock sweep aborted, tenant listing failed: {}", e);
                return Vec::new();
            }
        };

        let mut reports = Vec::with_capacity(tenants.len());
        for config in tenants {
            let tenant_id = config.tenant_id.clone();
            let report = match timeout(TENANT_BUDGET, self.sweep_tenant(config, now_utc)).await {
                Ok(report) => report,
                Err(_) => {
                    error!("Lock sweep exceeded time budget for tenant {}", tenant_id);
                    TenantLockReport {
                        tenant_id,
                        period_start: None,
                        outcome: LockOutcome::Error("time budget exceeded".to_string()),
                    }
                }
            };
            reports.push(report);
        }
        info!("Lock sweep finished: {} tenants processed", reports.len());
        reports
    }

    async fn sweep_tenant(&self, config: TenantConfig, now_utc: DateTime<Utc>) -> TenantLockReport {
        let tenant_id = config.tenant_id.clone();

        if !config.auto_lock_enabled {
            return TenantLockReport {
                tenant_id,
                period_start: None,
                outcome: LockOutcome::Skipped,
            };
        }

        let tz = match resolve_tz(&config.timezone) {
            Ok(tz) => tz,
            Err(e) => {
                error!("Lock sweep skipping tenant {}: {}", tenant_id, e);
                return TenantLockReport {
                    tenant_id,
                    period_start: None,
                    outcome: LockOutcome::Error(e.to_string()),
                };
            }
        };

        let today = local_date(tz, now_utc);
        let deadline = Self::current_month_deadline(config.deadline_day, today);
        if today <= deadline {
            return TenantLockReport {
                tenant_id,
                period_start: None,
                outcome: LockOutcome::NotYet,
            };
        }

        let target = Self::previous_month_start(today);
        let outcome = self
            .ensure_locked(&tenant_id, target, "auto-lock after deadline")
            .await;
        TenantLockReport {
            tenant_id,
            period_start: Some(target),
            outcome,
        }
    }

    /// Idempotent lock transition keyed on (tenant, period start). Safe to
    /// call repeatedly; a second call for an already locked period is a
    /// no-op reported as such.
    pub async fn ensure_locked(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
        reason: &str,
    ) -> LockOutcome {
        let existing = match self.locks.get(tenant_id, period_start).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(
                    "Lock read failed for tenant {} period {}: {}",
                    tenant_id, period_start, e
                );
                return LockOutcome::Error(e.to_string());
            }
        };

        if existing.as_ref().is_some_and(|lock| lock.locked) {
            return LockOutcome::AlreadyLocked;
        }

        let had_row = existing.is_some();
        match self
            .locks
            .upsert(tenant_id, period_start, true, Some(reason.to_string()))
            .await
        {
            Ok(()) => {
                info!(
                    "Locked period {} for tenant {} ({})",
                    period_start, tenant_id, reason
                );
                if had_row {
                    LockOutcome::Updated
                } else {
                    LockOutcome::Locked
                }
            }
            Err(e) => {
                error!(
                    "Lock write failed for tenant {} period {}: {}",
                    tenant_id, period_start, e
                );
                LockOutcome::Error(e.to_string())
            }
        }
    }

    /// Manual administrator override. Bypasses the auto-lock gate and is the
    /// only path that may unlock a period again.
    pub async fn set_locked(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
        locked: bool,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        info!(
            "Manual lock override for tenant {} period {}: locked={}",
            tenant_id, period_start, locked
        );
        self.locks
            .upsert(tenant_id, period_start, locked, reason)
            .await
    }
}
