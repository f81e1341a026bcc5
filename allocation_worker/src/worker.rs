use chrono::{Duration, Utc};
use log::*;
use ticket_allocation_engine::{events::EventProducers, AllocationApi, SqliteDatabase, Timekeeper};
use tokio::task::JoinHandle;

/// Starts the reclaim & promotion worker. Do not await the returned JoinHandle, as it will run
/// indefinitely.
///
/// Each pass first allocates any release whose window closed without an allocation run, then
/// reclaims unpaid tickets and promotes reserves across every open release.
pub fn start_reclaim_worker(
    db: SqliteDatabase,
    tk: Timekeeper,
    producers: EventProducers,
    tick_interval: std::time::Duration,
    reclaim_grace: Duration,
    sweep_on_close: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(tick_interval);
        let api = AllocationApi::new(db, tk, producers);
        info!("🕰️ Reclaim & promotion worker started");
        loop {
            timer.tick().await;
            let now = Utc::now();
            if sweep_on_close {
                let swept = api.sweep_closed_releases(now).await;
                if swept > 0 {
                    info!("🕰️ {swept} closed releases allocated");
                }
            }
            let summary = api.tick(now, reclaim_grace).await;
            debug!(
                "🕰️ Reclaim pass complete: {} expired, {} promoted, {} renumbered, {} skipped",
                summary.expired, summary.promoted, summary.renumbered, summary.skipped
            );
            if summary.invariant_failures > 0 {
                error!(
                    "🕰️ {} releases reported invariant violations and were halted. Operator attention is needed.",
                    summary.invariant_failures
                );
            }
        }
    })
}
