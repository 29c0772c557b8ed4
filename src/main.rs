// src/main.rs
use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::{
    extract::{Path as AxumPath, Query, State},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::NaiveDate;
use clap::Parser;
use serde::Deserialize;
use std::{env, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration as StdDuration};
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod clock;
mod deadline;
mod lock;
mod pending;
mod period;
mod reminder;
mod store;
mod timezone;


use clock::{Clock, SystemClock};
use lock::{PeriodLockManager, TenantLockReport};
use pending::{EmployeePendingSnapshot, PendingStatusAggregator};
use reminder::{ReminderScheduler, ReminderSweepReport};
use store::{
    EmployeeDirectory, InMemoryStore, LogDispatcher, StoreError, TenantConfigReader,
};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        error!("Error occurred: {:?}", self);
        let (status_code, error_message) = match &self {
            AppError::MissingEnvVar(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error.",
            ),
            AppError::Store(StoreError::TenantNotFound(_))
            | AppError::Store(StoreError::EmployeeNotFound(_)) => {
                (StatusCode::NOT_FOUND, "Unknown tenant or employee.")
            }
            AppError::Store(StoreError::Config(_)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "Invalid tenant configuration.",
            ),
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Storage error."),
        };
        (
            status_code,
            Html(format!("<h1>Error</h1><p>{}</p>", error_message)),
        )
            .into_response()
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "periodwatch-core",
    about = "Period & deadline engine for multi-tenant time reporting"
)]
struct Args {
    /// Address to bind the API server on.
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    /// JSON seed file with tenants, employees, timesheets and delegations.
    #[arg(long)]
    seed: Option<PathBuf>,
    /// Seconds between scheduled lock/reminder sweeps.
    #[arg(long, default_value_t = 24 * 60 * 60)]
    sweep_interval_secs: u64,
    /// Serve the API only; never run the periodic sweeps.
    #[arg(long)]
    no_scheduler: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub store: InMemoryStore,
    pub lock_manager: Arc<PeriodLockManager>,
    pub aggregator: Arc<PendingStatusAggregator>,
    pub scheduler: Arc<ReminderScheduler>,
    pub clock: Arc<dyn Clock>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Tracing subscriber initialized.");

    let store = InMemoryStore::default();
    if let Some(path) = &args.seed {
        store
            .load_seed_file(path)
            .with_context(|| format!("Loading seed file {}", path.display()))?;
        info!("Seed data loaded from {}", path.display());
    }

    let shared: Arc<InMemoryStore> = Arc::new(store.clone());
    let lock_manager = Arc::new(PeriodLockManager::new(shared.clone(), shared.clone()));
    let aggregator = Arc::new(PendingStatusAggregator::new(shared.clone()));
    let scheduler = Arc::new(ReminderScheduler::new(
        shared.clone(),
        shared.clone(),
        shared.clone(),
        shared.clone(),
        Arc::new(LogDispatcher),
    ));
    let app_clock: Arc<dyn Clock> = Arc::new(SystemClock);
    info!("Engine components initialized.");

    if !args.no_scheduler {
        let sweep_locks = lock_manager.clone();
        let sweep_reminders = scheduler.clone();
        let sweep_clock = app_clock.clone();
        let interval = StdDuration::from_secs(args.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                let now = sweep_clock.now_utc();
                info!("Scheduled sweep starting");
                let lock_reports = sweep_locks.sweep(now).await;
                info!("Scheduled lock sweep produced {} reports", lock_reports.len());
                let reminder_report = sweep_reminders.run_sweep(now, false).await;
                info!(
                    "Scheduled reminder sweep: {} runs, {} failures",
                    reminder_report.runs.len(),
                    reminder_report.failed_tenants
                );
                tokio::time::sleep(interval).await;
            }
        });
        info!(
            "Periodic sweep task started (every {}s)",
            args.sweep_interval_secs.max(1)
        );
    }

    let app_state = AppState {
        store,
        lock_manager,
        aggregator,
        scheduler,
        clock: app_clock,
    };

    let api_routes = Router::new()
        .route("/sweeps/reminders", post(handle_reminder_sweep))
        .route("/sweeps/locks", post(handle_lock_sweep))
        .route("/employees/{employee_id}/pending", get(handle_employee_pending))
        .route("/tenants/{tenant_id}/locks", post(handle_manual_lock));
    let app = Router::new()
        .nest("/api", api_routes)
        .route("/status", get(handle_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    match (env::var("CERT_PATH").ok(), env::var("KEY_PATH").ok()) {
        (Some(cert_path), Some(key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .context("Failed to load TLS cert/key")?;
            info!("Starting server on https://{}", args.bind);
            axum_server::bind_rustls(args.bind, tls_config)
                .serve(app.into_make_service())
                .await
                .context("HTTPS server failed")?;
        }
        _ => {
            info!(
                "CERT_PATH/KEY_PATH not set; starting plain HTTP server on http://{}",
                args.bind
            );
            axum_server::bind(args.bind)
                .serve(app.into_make_service())
                .await
                .context("HTTP server failed")?;
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct SweepParams {
    #[serde(default)]
    force: bool,
}

async fn handle_reminder_sweep(
    State(state): State<AppState>,
    Query(params): Query<SweepParams>,
) -> Json<ReminderSweepReport> {
    info!("Handling reminder sweep request (force={})...", params.force);
    let report = state
        .scheduler
        .run_sweep(state.clock.now_utc(), params.force)
        .await;
    Json(report)
}

async fn handle_lock_sweep(State(state): State<AppState>) -> Json<Vec<TenantLockReport>> {
    info!("Handling lock sweep request...");
    let reports = state.lock_manager.sweep(state.clock.now_utc()).await;
    Json(reports)
}

async fn handle_employee_pending(
    State(state): State<AppState>,
    AxumPath(employee_id): AxumPath<String>,
) -> Result<Json<EmployeePendingSnapshot>, AppError> {
    info!("Handling pending status request for employee {}...", employee_id);
    let employee = EmployeeDirectory::get(&state.store, &employee_id).await?;
    let config = TenantConfigReader::get(&state.store, &employee.tenant_id).await?;
    let snapshot = state
        .aggregator
        .compute_snapshot(&employee, &config, state.clock.now_utc())
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ManualLockRequest {
    period_start: NaiveDate,
    locked: bool,
    reason: Option<String>,
}

async fn handle_manual_lock(
    State(state): State<AppState>,
    AxumPath(tenant_id): AxumPath<String>,
    Json(request): Json<ManualLockRequest>,
) -> Result<StatusCode, AppError> {
    info!(
        "Handling manual lock request for tenant {} period {}...",
        tenant_id, request.period_start
    );
    // Confirm the tenant exists before touching the lock table.
    TenantConfigReader::get(&state.store, &tenant_id).await?;
    state
        .lock_manager
        .set_locked(&tenant_id, request.period_start, request.locked, request.reason)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_status(State(state): State<AppState>) -> Html<String> {
    info!("Handling /status request...");
    let html_body = format!(
        "<h1>Server Status</h1><p>Current Time (Server): {}</p><hr>\
         <p>Tenants: {}</p>\
         <p>Employees: {}</p>\
         <p>Period Locks: {}</p>",
        state.clock.now_utc().to_rfc3339(),
        state.store.tenant_count(),
        state.store.employee_count(),
        state.store.lock_count()
    );
    Html(html_body)
}
