//! Background rollup worker
//!
//! Periodically opens the current UTC day and folds the day's ledger
//! activity into its summaries. Both steps are idempotent, so overlapping or
//! repeated passes are harmless; failures are logged and the next tick tries
//! again.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::error::AppResult;
use crate::services::DailySummaryService;

/// Counts from one rollup pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollupReport {
    pub opened: u64,
    pub aggregated: usize,
    pub fallbacks: usize,
}

/// Open `date` and aggregate every product moved on it
pub async fn run_rollup(service: &DailySummaryService, date: NaiveDate) -> AppResult<RollupReport> {
    let opened = service.open_day(date).await?;
    let outcomes = service.aggregate_moved(date).await?;
    Ok(RollupReport {
        opened,
        aggregated: outcomes.len(),
        fallbacks: outcomes.iter().filter(|o| o.opened_by_fallback).count(),
    })
}

/// Spawn the rollup loop on the runtime
pub fn spawn_rollup(service: DailySummaryService, every: Duration) -> JoinHandle<()> {
    tracing::info!(interval_secs = every.as_secs(), "Starting daily rollup worker");

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let today = Utc::now().date_naive();

            match run_rollup(&service, today).await {
                Ok(report) => tracing::info!(
                    date = %today,
                    opened = report.opened,
                    aggregated = report.aggregated,
                    fallbacks = report.fallbacks,
                    "Rollup pass finished"
                ),
                Err(e) => tracing::error!(date = %today, "Rollup pass failed: {}", e),
            }
        }
    })
}
