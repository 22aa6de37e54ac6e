//! Periodic overdue loan scan

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    loans::{today, LoansService},
    tasks::{Task, TaskQueue},
};
use crate::error::AppResult;

/// Enqueue one reminder per overdue loan, returns how many were queued
pub async fn scan_overdue(
    loans: &LoansService,
    queue: &dyn TaskQueue,
    today: NaiveDate,
) -> AppResult<usize> {
    let overdue = loans.overdue_loans(today).await?;
    let mut queued = 0;
    for loan in &overdue {
        match queue.enqueue(Task::OverdueReminder { loan_id: loan.id }) {
            Ok(()) => queued += 1,
            Err(e) => tracing::warn!(loan_id = loan.id, error = %e, "Failed to enqueue overdue reminder"),
        }
    }
    tracing::info!(overdue = overdue.len(), queued, "Overdue scan finished");
    Ok(queued)
}

/// Run [`scan_overdue`] every `interval`; `None` when the interval is zero
pub fn spawn_overdue_scan(
    loans: LoansService,
    queue: Arc<dyn TaskQueue>,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Overdue scan disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = scan_overdue(&loans, queue.as_ref(), today()).await {
                tracing::error!(error = %e, "Overdue scan failed");
            }
        }
    }))
}
