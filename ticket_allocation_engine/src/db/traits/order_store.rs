use chrono::{DateTime, Duration, Utc};
use tas_common::Money;

use crate::{
    db::traits::{AllocationOutcome, NewTicket, ReclaimOutcome, Rejection, StoreError},
    db_types::{NewOrder, NewTicketRelease, Ticket, TicketOrder, TicketRelease, TicketType},
    timekeeper::Timekeeper,
};

/// The order store: durable catalog of releases, ticket types, orders and tickets, plus the
/// transactional operations the coordinator and the reclaim loop are built on.
///
/// Multi-row operations commit in a single serializable transaction; no caller ever observes a
/// partially applied allocation or reclaim pass. The release row is the only coordination point —
/// two writers racing on one release serialize on it, and the loser of an allocation race gets
/// [`StoreError::AlreadyAllocated`] at commit time.
#[allow(async_fn_in_trait)]
pub trait OrderStore: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    //------------------------------------ catalog ------------------------------------

    async fn create_release(&self, release: NewTicketRelease) -> Result<TicketRelease, StoreError>;

    async fn add_ticket_type(&self, release_id: i64, name: &str, price: Money) -> Result<TicketType, StoreError>;

    /// Fetches a release together with its method detail and payment deadline.
    async fn fetch_release(&self, id: i64) -> Result<TicketRelease, StoreError>;

    async fn fetch_order(&self, order_id: i64) -> Result<TicketOrder, StoreError>;

    //------------------------------------ intake -------------------------------------

    /// Validates and stores a new order in one transaction: the release window must be open, the
    /// release must not be promo-gated against this caller, and the user's cumulative quantity
    /// across the release's event must stay within `max_per_user`.
    async fn insert_order(&self, order: NewOrder, now: DateTime<Utc>) -> Result<TicketOrder, StoreError>;

    /// Soft-deletes an unhandled order. Only the owner may cancel, and only before allocation has
    /// touched the order.
    async fn cancel_order(&self, order_id: i64, actor_user_id: i64, now: DateTime<Utc>)
        -> Result<TicketOrder, StoreError>;

    /// Records payment for a ticket. Idempotent for a repeated call with the same payment
    /// reference; refuses deleted tickets and tickets already paid under a different reference.
    async fn mark_ticket_paid(&self, ticket_id: i64, payment_ref: &str) -> Result<Ticket, StoreError>;

    //--------------------------------- allocation ------------------------------------

    /// The non-deleted, non-handled orders of a release in `created_at` ascending order, ties
    /// broken by id. This is the exact queue the policy expects.
    async fn fetch_candidate_orders(&self, release_id: i64) -> Result<Vec<TicketOrder>, StoreError>;

    /// Atomically flips the release's one-way `allocated` latch, inserts the given ticket rows,
    /// and stamps `handled_at` (plus the rejection memo where applicable) on every affected
    /// order. Fails with [`StoreError::AlreadyAllocated`] when another coordinator got there
    /// first — detected at commit time via the guarded latch update, not a prior read.
    async fn insert_tickets_and_handle(
        &self,
        release_id: i64,
        tickets: &[NewTicket],
        rejections: &[Rejection],
        now: DateTime<Utc>,
    ) -> Result<AllocationOutcome, StoreError>;

    //----------------------------------- tickets -------------------------------------

    /// Rank-0, non-deleted tickets of a release.
    async fn list_allocated_tickets(&self, release_id: i64) -> Result<Vec<Ticket>, StoreError>;

    /// Non-deleted reserve tickets of a release, rank ascending.
    async fn list_reserve_tickets(&self, release_id: i64) -> Result<Vec<Ticket>, StoreError>;

    //------------------------------------ reclaim ------------------------------------

    /// One reclaim pass over one release, in one transaction: expire unpaid allocated tickets
    /// past their deadline, promote reserves into the freed slots in rank order, renumber the
    /// survivors back to a dense 1..K. A quiescent release returns an empty outcome.
    async fn reclaim_and_promote(
        &self,
        release_id: i64,
        now: DateTime<Utc>,
        tk: &Timekeeper,
    ) -> Result<ReclaimOutcome, StoreError>;

    /// Releases the reclaim loop should visit: allocated, and not closed longer ago than `grace`.
    async fn open_allocated_releases(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<i64>, StoreError>;

    /// Releases whose window has closed without an allocation run, for the close trigger.
    async fn closed_unallocated_releases(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StoreError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}
