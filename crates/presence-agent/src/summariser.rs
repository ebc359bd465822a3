/// Hourly aggregation task.
///
/// Sleeps to the top of each hour, then folds the previous closed window
/// of state changes into one summary row per present employee and hands
/// the batch to the reporter. Running strictly after the window closes
/// means it never races the scan loop for that hour's rows.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use presence_core::model::{Employee, HourlySummary, Status};
use presence_core::summary::{presence_span, HourWindow};

use crate::reporter::Reporter;
use crate::scheduler::{self, TaskPulse};
use crate::store::Store;

pub async fn run(store: Arc<Store>, reporter: Arc<Reporter>, pulse: TaskPulse) {
    info!("Summariser started");
    loop {
        let wait = scheduler::until_next_hour(Utc::now());
        debug!(secs = wait.as_secs(), "Sleeping until the top of the hour");
        scheduler::sleep_pulsing(wait, &pulse).await;

        let window = HourWindow::previous(Utc::now());
        match summarise_window(&store, window) {
            Ok(batch) => {
                info!(rows = batch.len(), hour = %window.start, "Hour summarised");
                reporter.deliver_summaries(&store, &batch).await;
            }
            Err(e) => warn!(error = %e, "Failed to summarise hour"),
        }
    }
}

/// Aggregate one closed window into summary rows (`synced = false`).
/// Employees offline for the whole hour contribute nothing.
pub fn summarise_window(
    store: &Store,
    window: HourWindow,
) -> anyhow::Result<Vec<(HourlySummary, Employee)>> {
    let mut batch = Vec::new();

    for employee in store.list_employees()? {
        let initial = store.latest_state_change_before(employee.id, window.start)?;
        let was_online_at_start = initial
            .map(|sc| sc.status == Status::Online)
            .unwrap_or(false);
        let changes = store.state_changes_in_range(employee.id, window.start, window.end)?;

        let Some(span) = presence_span(window, was_online_at_start, &changes) else {
            continue;
        };
        let summary = store.upsert_hourly_summary(employee.id, window.start, &span)?;
        batch.push((summary, employee));
    }

    Ok(batch)
}
