// src/store.rs
//
// Data model rows and the collaborator seams the engine runs against.
// Persistence, delivery transport and tenant administration are external
// services; the engine only sees these traits. The in-memory implementation
// backs local runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

use crate::period::MAX_DEADLINE_DAY;
use crate::timezone::{resolve_tz, ConfigError};

pub type TenantId = String;
pub type EmployeeId = String;
pub type ManagerId = String;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Tenant not found: {0}")]
    TenantNotFound(TenantId),
    #[error("Employee not found: {0}")]
    EmployeeNotFound(EmployeeId),
    #[error("Storage backend failure: {0}")]
    Backend(String),
    #[error("Seed file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Seed file parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// --- Rows ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: TenantId,
    /// IANA zone name, e.g. "Europe/Stockholm".
    pub timezone: String,
    /// 1..=28, or 0 for calendar months.
    pub deadline_day: u8,
    #[serde(default = "default_true")]
    pub auto_lock_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl TenantConfig {
    /// Boundary validation. The period calculator tolerates out-of-range
    /// days defensively, but persisted configs must stay in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        resolve_tz(&self.timezone)?;
        if self.deadline_day > MAX_DEADLINE_DAY {
            return Err(ConfigError::DeadlineDayOutOfRange(self.deadline_day));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimesheetStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl TimesheetStatus {
    /// Normalizes loosely-typed status text at the boundary. Unrecognized
    /// values fall back to Draft with a warning.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Self::Draft,
            "submitted" => Self::Submitted,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            other => {
                warn!("Unrecognized timesheet status '{}'; treating as draft", other);
                Self::Draft
            }
        }
    }

    /// Submitted or approved timesheets no longer count as pending.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Submitted | Self::Approved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimesheetRow {
    pub id: String,
    pub employee_id: EmployeeId,
    pub period_start: NaiveDate,
    pub status: TimesheetStatus,
    pub entry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub employee_id: EmployeeId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Lower bound for the pending-history walk; periods before the
    /// employee existed are never reported.
    pub created_at: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodLock {
    pub tenant_id: TenantId,
    pub period_start: NaiveDate,
    pub locked: bool,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    EmployeeReminder,
    ManagerDigest,
}

// --- Collaborator seams ---

#[async_trait]
pub trait TenantConfigReader: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<TenantConfig, StoreError>;
    async fn list(&self) -> Result<Vec<TenantConfig>, StoreError>;
}

#[async_trait]
pub trait TimesheetReader: Send + Sync {
    async fn find_by_employee_and_period(
        &self,
        employee_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<TimesheetRow>, StoreError>;

    async fn list_by_tenant_and_period(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
    ) -> Result<Vec<TimesheetRow>, StoreError>;

    /// Batch fetch covering several period starts at once (inclusive
    /// bounds). One query per history walk instead of one per period.
    async fn list_by_employee_in_range(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimesheetRow>, StoreError>;
}

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    async fn get(&self, employee_id: &str) -> Result<EmployeeRecord, StoreError>;
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<EmployeeRecord>, StoreError>;
}

#[async_trait]
pub trait DelegationReader: Send + Sync {
    /// Managers with delegated visibility over at least one of the given
    /// employees, with the subset each one covers.
    async fn managers_for_employees(
        &self,
        employee_ids: &[EmployeeId],
    ) -> Result<HashMap<ManagerId, HashSet<EmployeeId>>, StoreError>;
}

#[async_trait]
pub trait LockStore: Send + Sync {
    async fn get(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<PeriodLock>, StoreError>;

    /// Atomic keyed upsert: at most one row per (tenant, period start),
    /// regardless of concurrent callers.
    async fn upsert(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
        locked: bool,
        reason: Option<String>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError>;
}

// --- In-memory implementation ---

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tenants: Arc<Mutex<HashMap<TenantId, TenantConfig>>>,
    employees: Arc<Mutex<HashMap<EmployeeId, EmployeeRecord>>>,
    timesheets: Arc<Mutex<HashMap<(EmployeeId, NaiveDate), TimesheetRow>>>,
    delegations: Arc<Mutex<HashMap<ManagerId, HashSet<EmployeeId>>>>,
    locks: Arc<Mutex<HashMap<(TenantId, NaiveDate), PeriodLock>>>,
}

impl InMemoryStore {
    pub fn add_tenant(&self, config: TenantConfig) -> Result<(), StoreError> {
        config.validate()?;
        self.tenants
            .lock()
            .unwrap()
            .insert(config.tenant_id.clone(), config);
        Ok(())
    }

    pub fn add_employee(&self, employee: EmployeeRecord) {
        self.employees
            .lock()
            .unwrap()
            .insert(employee.employee_id.clone(), employee);
    }

    pub fn upsert_timesheet(&self, row: TimesheetRow) {
        self.timesheets
            .lock()
            .unwrap()
            .insert((row.employee_id.clone(), row.period_start), row);
    }

    pub fn set_delegation(&self, manager_id: &str, employee_ids: impl IntoIterator<Item = EmployeeId>) {
        self.delegations
            .lock()
            .unwrap()
            .insert(manager_id.to_string(), employee_ids.into_iter().collect());
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.lock().unwrap().len()
    }

    pub fn employee_count(&self) -> usize {
        self.employees.lock().unwrap().len()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap().len()
    }

    pub fn load_seed_file(&self, path: &Path) -> Result<(), StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let seed: SeedFile = serde_json::from_str(&raw)?;
        self.apply_seed(seed)
    }

    pub fn apply_seed(&self, seed: SeedFile) -> Result<(), StoreError> {
        for tenant in seed.tenants {
            self.add_tenant(tenant)?;
        }
        for employee in seed.employees {
            self.add_employee(employee);
        }
        for sheet in seed.timesheets {
            self.upsert_timesheet(TimesheetRow {
                id: sheet.id,
                employee_id: sheet.employee_id,
                period_start: sheet.period_start,
                status: TimesheetStatus::normalize(&sheet.status),
                entry_count: sheet.entry_count,
            });
        }
        for delegation in seed.delegations {
            self.set_delegation(&delegation.manager_id, delegation.employee_ids);
        }
        info!(
            "Seed applied: {} tenants, {} employees, {} timesheets",
            self.tenant_count(),
            self.employee_count(),
            self.timesheets.lock().unwrap().len()
        );
        Ok(())
    }
}

#[async_trait]
impl TenantConfigReader for InMemoryStore {
    async fn get(&self, tenant_id: &str) -> Result<TenantConfig, StoreError> {
        self.tenants
            .lock()
            .unwrap()
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::TenantNotFound(tenant_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<TenantConfig>, StoreError> {
        let mut tenants: Vec<TenantConfig> =
            self.tenants.lock().unwrap().values().cloned().collect();
        tenants.sort_by(|a, b| a.tenant_id.cmp(&b.tenant_id));
        Ok(tenants)
    }
}

#[async_trait]
impl TimesheetReader for InMemoryStore {
    async fn find_by_employee_and_period(
        &self,
        employee_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<TimesheetRow>, StoreError> {
        Ok(self
            .timesheets
            .lock()
            .unwrap()
            .get(&(employee_id.to_string(), period_start))
            .cloned())
    }

    async fn list_by_tenant_and_period(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
    ) -> Result<Vec<TimesheetRow>, StoreError> {
        let tenant_employees: HashSet<EmployeeId> = self
            .employees
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .map(|e| e.employee_id.clone())
            .collect();
        Ok(self
            .timesheets
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.period_start == period_start && tenant_employees.contains(&row.employee_id))
            .cloned()
            .collect())
    }

    async fn list_by_employee_in_range(
        &self,
        employee_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TimesheetRow>, StoreError> {
        Ok(self
            .timesheets
            .lock()
            .unwrap()
            .values()
            .filter(|row| {
                row.employee_id == employee_id
                    && row.period_start >= from
                    && row.period_start <= to
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmployeeDirectory for InMemoryStore {
    async fn get(&self, employee_id: &str) -> Result<EmployeeRecord, StoreError> {
        self.employees
            .lock()
            .unwrap()
            .get(employee_id)
            .cloned()
            .ok_or_else(|| StoreError::EmployeeNotFound(employee_id.to_string()))
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<EmployeeRecord>, StoreError> {
        let mut employees: Vec<EmployeeRecord> = self
            .employees
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect();
        employees.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
        Ok(employees)
    }
}

#[async_trait]
impl DelegationReader for InMemoryStore {
    async fn managers_for_employees(
        &self,
        employee_ids: &[EmployeeId],
    ) -> Result<HashMap<ManagerId, HashSet<EmployeeId>>, StoreError> {
        let wanted: HashSet<&EmployeeId> = employee_ids.iter().collect();
        let mut groups = HashMap::new();
        for (manager_id, delegated) in self.delegations.lock().unwrap().iter() {
            let covered: HashSet<EmployeeId> = delegated
                .iter()
                .filter(|id| wanted.contains(id))
                .cloned()
                .collect();
            if !covered.is_empty() {
                groups.insert(manager_id.clone(), covered);
            }
        }
        Ok(groups)
    }
}

#[async_trait]
impl LockStore for InMemoryStore {
    async fn get(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
    ) -> Result<Option<PeriodLock>, StoreError> {
        Ok(self
            .locks
            .lock()
            .unwrap()
            .get(&(tenant_id.to_string(), period_start))
            .cloned())
    }

    async fn upsert(
        &self,
        tenant_id: &str,
        period_start: NaiveDate,
        locked: bool,
        reason: Option<String>,
    ) -> Result<(), StoreError> {
        // Single map insert under one lock: concurrent callers for the same
        // key cannot produce duplicate rows.
        self.locks.lock().unwrap().insert(
            (tenant_id.to_string(), period_start),
            PeriodLock {
                tenant_id: tenant_id.to_string(),
                period_start,
                locked,
                reason,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }
}

// --- Dispatchers ---

/// Dispatcher standing in for the real delivery transport (an external
/// service). Logs every send and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        info!("NOTIFICATION [{:?}] to {}: {}", kind, recipient, payload);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub payload: serde_json::Value,
}

/// Recording dispatcher for tests: captures everything sent and can be told
/// to fail for specific recipients.
#[derive(Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<SentNotification>>>,
    fail_recipients: Arc<Mutex<HashSet<String>>>,
}

impl RecordingDispatcher {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_for(&self, recipient: &str) {
        self.fail_recipients
            .lock()
            .unwrap()
            .insert(recipient.to_string());
    }

    pub fn count_kind(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn send(
        &self,
        kind: NotificationKind,
        recipient: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        if self.fail_recipients.lock().unwrap().contains(recipient) {
            return Err(StoreError::Backend(format!(
                "simulated dispatch failure for {}",
                recipient
            )));
        }
        self.sent.lock().unwrap().push(SentNotification {
            kind,
            recipient: recipient.to_string(),
            payload,
        });
        Ok(())
    }
}

// --- Seed file ---

#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub employees: Vec<EmployeeRecord>,
    #[serde(default)]
    pub timesheets: Vec<SeedTimesheet>,
    #[serde(default)]
    pub delegations: Vec<SeedDelegation>,
}

#[derive(Debug, Deserialize)]
pub struct SeedTimesheet {
    pub id: String,
    pub employee_id: EmployeeId,
    pub period_start: NaiveDate,
    /// Free-form status text; normalized on load.
    pub status: String,
    #[serde(default)]
    pub entry_count: u32,
}

#[derive(Debug, Deserialize)]
pub struct SeedDelegation {
    pub manager_id: ManagerId,
    pub employee_ids: Vec<EmployeeId>,
}
