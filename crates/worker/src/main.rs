#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Plan Automator Background Worker
//!
//! Handles scheduled jobs:
//! - Reconciliation sweep over every owner's snapshot (default every 15 minutes)
//! - Heartbeat (every 5 minutes)

use std::path::Path;
use std::time::Duration;

use planautomator_engine::{EngineConfig, OwnerStore, PlanAutomator};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

const DEFAULT_RECONCILE_CRON: &str = "0 */15 * * * *";

/// Totals from one reconciliation sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SweepReport {
    owners: usize,
    customers: usize,
    with_access: usize,
    churned: usize,
    unhealthy_owners: usize,
}

/// Reload every owner snapshot and log access, churn and invariant results.
/// Read-only: snapshots are never rewritten by the sweep.
async fn run_reconciliation_sweep(
    engine: &EngineConfig,
    data_dir: &Path,
    now: OffsetDateTime,
) -> anyhow::Result<SweepReport> {
    let store = OwnerStore::open(data_dir).await?;
    let automator = PlanAutomator::new(engine, store);
    let mut report = SweepReport::default();

    for owner in automator.store().owners().await {
        let access = automator.access_summary(owner, now).await;
        let churn = automator.churn_summary(owner, now).await;
        let invariants = automator.check_invariants(owner, now).await;

        info!(
            owner_id = %owner,
            customers = access.total_customers,
            active = access.active,
            canceled_with_access = access.canceled_with_access,
            expired = access.expired,
            churn_rate = churn.churn_rate,
            "Owner reconciled"
        );

        if !invariants.healthy {
            report.unhealthy_owners += 1;
            for violation in &invariants.violations {
                warn!(
                    owner_id = %owner,
                    invariant = %violation.invariant,
                    severity = %violation.severity,
                    description = %violation.description,
                    "Invariant violation"
                );
            }
        }

        report.owners += 1;
        report.customers += access.total_customers;
        report.with_access += access.with_access;
        report.churned += churn.churned;
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Plan Automator Worker");

    let engine = EngineConfig::from_env()?;
    let reconcile_cron = std::env::var("RECONCILE_CRON")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RECONCILE_CRON.to_string());

    let scheduler = JobScheduler::new().await?;
    let mut job_count = 0;

    // Job 1: Reconciliation sweep
    match engine.data_dir.clone() {
        Some(data_dir) => {
            let sweep_engine = engine.clone();
            scheduler
                .add(Job::new_async(reconcile_cron.as_str(), move |_uuid, _l| {
                    let engine = sweep_engine.clone();
                    let data_dir = data_dir.clone();
                    Box::pin(async move {
                        info!("Running reconciliation sweep");
                        match run_reconciliation_sweep(&engine, &data_dir, OffsetDateTime::now_utc())
                            .await
                        {
                            Ok(report) => info!(
                                owners = report.owners,
                                customers = report.customers,
                                with_access = report.with_access,
                                churned = report.churned,
                                unhealthy_owners = report.unhealthy_owners,
                                "Reconciliation sweep complete"
                            ),
                            Err(e) => error!(error = %e, "Reconciliation sweep failed"),
                        }
                    })
                })?)
                .await?;
            job_count += 1;
            info!(cron = %reconcile_cron, "Scheduled: Reconciliation sweep");
        }
        None => {
            warn!("DATA_DIR not set - no snapshots to reconcile, running heartbeat only");
        }
    }

    // Job 2: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    job_count += 1;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!(
        "Plan Automator Worker started successfully with {} scheduled jobs",
        job_count
    );

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
