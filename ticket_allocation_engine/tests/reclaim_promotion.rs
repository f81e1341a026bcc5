//! End-to-end reclaim & promotion against a real sqlite store: unpaid tickets past their deadline
//! are expired, reserves move up in rank order, and the survivors stay densely numbered.

use chrono::{Duration, Utc};
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use tas_common::Money;
use ticket_allocation_engine::{
    db_types::{AllocationTrigger, NewOrder, NewTicketRelease, PaymentDeadline, ReleaseMethod, TicketRelease},
    events::EventProducers,
    AllocationApi,
    OrderFlowApi,
    OrderStore,
    SqliteDatabase,
    StoreError,
    TickSummary,
    Timekeeper,
};
use tokio::runtime::Runtime;

use crate::support::prepare_env::{prepare_test_env, random_db_path};

mod support;

async fn setup() -> (OrderFlowApi<SqliteDatabase>, AllocationApi<SqliteDatabase>) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let allocator = AllocationApi::new(db.clone(), Timekeeper::default(), EventProducers::default());
    (OrderFlowApi::new(db), allocator)
}

async fn tear_down(mut api: OrderFlowApi<SqliteDatabase>) {
    let url = api.db().url().to_string();
    if let Err(e) = api.db_mut().close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

/// An open release whose absolute payment deadline has already passed, so tickets allocated now
/// are immediately reclaimable. Promoted reserves get a fresh 24 hour pay-within window.
async fn overdue_release(db: &SqliteDatabase, capacity: i64) -> TicketRelease {
    let opens_at = Utc::now() - Duration::hours(2);
    let new_release = NewTicketRelease::new(
        1,
        "Overdue release",
        opens_at,
        opens_at + Duration::hours(6),
        capacity,
        ReleaseMethod::FcfsLottery { open_window: Duration::hours(1) },
        20,
    )
    .with_payment_deadline(PaymentDeadline {
        absolute_deadline: Utc::now() - Duration::minutes(30),
        reserve_payment_duration: Some(Duration::hours(24)),
    });
    db.create_release(new_release).await.expect("Error creating release")
}

/// Fills the release with `n` single-ticket orders (one per user) and runs allocation.
async fn allocate_n_orders(flow: &OrderFlowApi<SqliteDatabase>, allocator: &AllocationApi<SqliteDatabase>, release: &TicketRelease, n: i64) {
    let tt = flow
        .db()
        .add_ticket_type(release.id, "General admission", Money::from_whole(45))
        .await
        .expect("Error adding type");
    for user in 1..=n {
        let at = release.opens_at + Duration::minutes(user);
        flow.submit_order_at(NewOrder::new(user, release.id, tt.id, 1), at).await.expect("Error submitting order");
    }
    allocator.allocate(release.id, AllocationTrigger::Manual).await.expect("Error allocating");
}

#[test]
fn expired_slots_are_filled_by_reserves_in_rank_order() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (flow, allocator) = setup().await;
        let release = overdue_release(flow.db(), 2).await;
        allocate_n_orders(&flow, &allocator, &release, 3).await;

        let allocated = flow.db().list_allocated_tickets(release.id).await.unwrap();
        let reserve = flow.db().list_reserve_tickets(release.id).await.unwrap().remove(0);
        let paid = flow.mark_paid(allocated[0].id, "pay-100").await.unwrap();
        let doomed_id = allocated[1].id;

        let now = Utc::now();
        let summary = allocator.tick(now, Duration::days(7)).await;
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.promoted, 1);
        assert_eq!(summary.renumbered, 0);
        assert_eq!(summary.invariant_failures, 0);

        let allocated = flow.db().list_allocated_tickets(release.id).await.unwrap();
        assert_eq!(allocated.len(), 2);
        assert!(allocated.iter().any(|t| t.id == paid.id));
        let promoted = allocated.iter().find(|t| t.id == reserve.id).expect("Reserve was not promoted");
        assert!(!promoted.is_reserve);
        assert_eq!(promoted.reserve_rank, 0);
        // A fresh pay-within deadline, not the lapsed absolute one.
        assert!(promoted.paid_deadline.unwrap() > now);
        assert!(flow.db().list_reserve_tickets(release.id).await.unwrap().is_empty());

        // The expired ticket stays dead.
        let err = flow.mark_paid(doomed_id, "pay-200").await.unwrap_err();
        assert!(matches!(err, StoreError::TicketDeleted(_)));

        // Nothing left past its deadline: the next pass is a fixed point.
        let summary = allocator.tick(Utc::now(), Duration::days(7)).await;
        assert_eq!(summary, TickSummary::default());
        tear_down(flow).await;
    });
}

#[test]
fn surviving_reserves_are_renumbered_densely() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (flow, allocator) = setup().await;
        let release = overdue_release(flow.db(), 3).await;
        allocate_n_orders(&flow, &allocator, &release, 5).await;

        let allocated = flow.db().list_allocated_tickets(release.id).await.unwrap();
        let reserves = flow.db().list_reserve_tickets(release.id).await.unwrap();
        flow.mark_paid(allocated[0].id, "pay-100").await.unwrap();
        flow.mark_paid(allocated[1].id, "pay-101").await.unwrap();

        let summary = allocator.tick(Utc::now(), Duration::days(7)).await;
        assert_eq!(summary.expired, 1);
        assert_eq!(summary.promoted, 1);
        assert_eq!(summary.renumbered, 1);

        // Rank 1 was promoted; the former rank 2 closes the gap.
        let remaining = flow.db().list_reserve_tickets(release.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, reserves[1].id);
        assert_eq!(remaining[0].reserve_rank, 1);
        tear_down(flow).await;
    });
}

#[test]
fn reserves_cannot_be_paid_before_promotion() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (flow, allocator) = setup().await;
        let release = overdue_release(flow.db(), 2).await;
        allocate_n_orders(&flow, &allocator, &release, 3).await;

        let reserve = flow.db().list_reserve_tickets(release.id).await.unwrap().remove(0);
        let err = flow.mark_paid(reserve.id, "pay-300").await.unwrap_err();
        assert!(matches!(err, StoreError::ReserveNotPayable(_)));
        tear_down(flow).await;
    });
}

#[test]
fn a_corrupted_rank_sequence_halts_reclaim_for_the_release() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (flow, allocator) = setup().await;
        let release = overdue_release(flow.db(), 2).await;
        allocate_n_orders(&flow, &allocator, &release, 3).await;

        let reserve = flow.db().list_reserve_tickets(release.id).await.unwrap().remove(0);
        sqlx::query("UPDATE tickets SET reserve_rank = 5 WHERE id = $1")
            .bind(reserve.id)
            .execute(flow.db().pool())
            .await
            .unwrap();

        let summary = allocator.tick(Utc::now(), Duration::days(7)).await;
        assert_eq!(summary.invariant_failures, 1);
        // The release is halted before anything is expired.
        assert_eq!(summary.expired, 0);
        assert_eq!(flow.db().list_allocated_tickets(release.id).await.unwrap().len(), 2);
        tear_down(flow).await;
    });
}

#[test]
fn closed_unallocated_releases_are_swept() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (flow, allocator) = setup().await;
        let opens_at = Utc::now() - Duration::hours(3);
        let new_release = NewTicketRelease::new(
            1,
            "Closed release",
            opens_at,
            opens_at + Duration::hours(2),
            2,
            ReleaseMethod::FcfsLottery { open_window: Duration::hours(1) },
            20,
        );
        let closed = flow.db().create_release(new_release).await.unwrap();
        let open = overdue_release(flow.db(), 2).await;
        let tt = flow.db().add_ticket_type(closed.id, "General admission", Money::from_whole(45)).await.unwrap();
        for user in 1..=3 {
            let at = closed.opens_at + Duration::minutes(user);
            flow.submit_order_at(NewOrder::new(user, closed.id, tt.id, 1), at).await.unwrap();
        }

        assert_eq!(allocator.sweep_closed_releases(Utc::now()).await, 1);
        assert!(flow.db().fetch_release(closed.id).await.unwrap().allocated);
        // The still-open release is left for its own close instant.
        assert!(!flow.db().fetch_release(open.id).await.unwrap().allocated);

        assert_eq!(allocator.sweep_closed_releases(Utc::now()).await, 0);
        tear_down(flow).await;
    });
}
