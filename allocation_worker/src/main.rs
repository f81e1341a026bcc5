mod config;
mod worker;

use std::{future::Future, pin::Pin};

use dotenvy::dotenv;
use log::*;
use ticket_allocation_engine::{
    events::{EventHandlers, EventHooks},
    SqliteDatabase,
    StoreError,
};

use crate::{config::WorkerConfig, worker::start_reclaim_worker};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();
    let config = WorkerConfig::from_env_or_default();

    info!("🚀️ Starting allocation worker against {}", config.database_url);
    match run_worker(config).await {
        Ok(_) => println!("Bye!"),
        Err(e) => eprintln!("{e}"),
    }
}

async fn run_worker(config: WorkerConfig) -> Result<(), StoreError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 10).await?;
    let handlers = EventHandlers::new(25, log_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let worker = start_reclaim_worker(
        db,
        config.timekeeper(),
        producers,
        config.tick_interval,
        config.reclaim_grace,
        config.sweep_on_close,
    );
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("🛑️ Could not listen for the shutdown signal: {e}");
    }
    info!("🛑️ Shutdown signal received. Stopping worker.");
    worker.abort();
    Ok(())
}

/// Log-only notification hooks. The email dispatcher replaces these when it plugs in; until then
/// every notification intent is visible in the worker log, with the full payload as JSON at
/// debug level.
fn log_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks.on_ticket_allocated(|ev| {
        Box::pin(async move {
            info!("📣️ Ticket {} allocated to user {}", ev.ticket.id, ev.ticket.user_id);
            log_payload("ticket_allocated", &ev);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_reserve_created(|ev| {
        Box::pin(async move {
            info!("📣️ User {} is reserve #{} on release {}", ev.ticket.user_id, ev.rank, ev.ticket.release_id);
            log_payload("reserve_created", &ev);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_reserve_promoted(|ev| {
        Box::pin(async move {
            info!(
                "📣️ Ticket {} promoted off the reserve list. Payment due by {:?}",
                ev.ticket.id, ev.ticket.paid_deadline
            );
            log_payload("reserve_promoted", &ev);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_reserve_rank_changed(|ev| {
        Box::pin(async move {
            info!(
                "📣️ Ticket {} moved from reserve #{} to #{} on release {}",
                ev.ticket_id, ev.old_rank, ev.new_rank, ev.release_id
            );
            log_payload("reserve_rank_changed", &ev);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks.on_ticket_expired(|ev| {
        Box::pin(async move {
            info!("📣️ Ticket {} for user {} expired ({})", ev.ticket.id, ev.ticket.user_id, ev.reason);
            log_payload("ticket_expired", &ev);
        }) as Pin<Box<dyn Future<Output = ()> + Send>>
    });
    hooks
}

fn log_payload<E: serde::Serialize>(kind: &str, event: &E) {
    match serde_json::to_string(event) {
        Ok(payload) => debug!("📣️ {kind} {payload}"),
        Err(e) => warn!("📣️ Could not serialize the {kind} payload: {e}"),
    }
}
