use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;
use sqlx::SqlitePool;
use tas_common::Money;

use super::{new_pool, orders, releases, tickets};
use crate::{
    db::traits::{AllocationOutcome, NewTicket, OrderStore, ReclaimOutcome, Rejection, StoreError},
    db_types::{NewOrder, NewTicketRelease, Ticket, TicketOrder, TicketRelease, TicketType},
    helpers::new_lottery_nonce,
    reclaim::{self, EXPIRY_REASON_UNPAID},
    timekeeper::Timekeeper,
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects to the database at `TAS_DATABASE_URL` (or the default path).
    pub async fn new(max_connections: u32) -> Result<Self, StoreError> {
        let url = super::db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl OrderStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn create_release(&self, release: NewTicketRelease) -> Result<TicketRelease, StoreError> {
        let mut tx = self.pool.begin().await?;
        let nonce = new_lottery_nonce();
        let release = releases::insert_release(release, nonce, Utc::now(), &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Release '{}' created with id {}", release.name, release.id);
        Ok(release)
    }

    async fn add_ticket_type(&self, release_id: i64, name: &str, price: Money) -> Result<TicketType, StoreError> {
        let mut conn = self.pool.acquire().await?;
        releases::fetch_release(release_id, &mut conn).await?.ok_or(StoreError::ReleaseNotFound(release_id))?;
        releases::insert_ticket_type(release_id, name, price, &mut conn).await
    }

    async fn fetch_release(&self, id: i64) -> Result<TicketRelease, StoreError> {
        let mut conn = self.pool.acquire().await?;
        releases::fetch_release(id, &mut conn).await?.ok_or(StoreError::ReleaseNotFound(id))
    }

    async fn fetch_order(&self, order_id: i64) -> Result<TicketOrder, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(order_id, &mut conn).await?.ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn insert_order(&self, order: NewOrder, now: DateTime<Utc>) -> Result<TicketOrder, StoreError> {
        let mut tx = self.pool.begin().await?;
        let release = releases::fetch_release(order.release_id, &mut tx)
            .await?
            .ok_or(StoreError::ReleaseNotFound(order.release_id))?;
        let order = orders::insert_new_order(&release, order, now, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order {} saved: {} x type {} for user {}", order.id, order.quantity, order.ticket_type_id, order.user_id);
        Ok(order)
    }

    async fn cancel_order(
        &self,
        order_id: i64,
        actor_user_id: i64,
        _now: DateTime<Utc>,
    ) -> Result<TicketOrder, StoreError> {
        let mut tx = self.pool.begin().await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(StoreError::OrderNotFound(order_id))?;
        if order.user_id != actor_user_id {
            return Err(StoreError::NotOrderOwner(order_id, actor_user_id));
        }
        if order.is_handled() {
            return Err(StoreError::OrderAlreadyHandled(order_id));
        }
        orders::soft_delete(order_id, "cancelled by owner", &mut tx).await?;
        let order = orders::fetch_order(order_id, &mut tx).await?.ok_or(StoreError::OrderNotFound(order_id))?;
        tx.commit().await?;
        debug!("🗃️ Order {order_id} cancelled by user {actor_user_id}");
        Ok(order)
    }

    async fn mark_ticket_paid(&self, ticket_id: i64, payment_ref: &str) -> Result<Ticket, StoreError> {
        let mut tx = self.pool.begin().await?;
        let ticket = tickets::fetch_ticket(ticket_id, &mut tx).await?.ok_or(StoreError::TicketNotFound(ticket_id))?;
        if ticket.deleted {
            return Err(StoreError::TicketDeleted(ticket_id));
        }
        if ticket.is_reserve {
            // Reserves carry no deadline and only become payable once promoted.
            return Err(StoreError::ReserveNotPayable(ticket_id));
        }
        if ticket.paid {
            // A repeat of the same payment notification changes nothing.
            return if ticket.payment_ref.as_deref() == Some(payment_ref) {
                Ok(ticket)
            } else {
                Err(StoreError::TicketAlreadyPaid(ticket_id))
            };
        }
        tickets::record_payment(ticket_id, payment_ref, Utc::now(), &mut tx).await?;
        let ticket = tickets::fetch_ticket(ticket_id, &mut tx).await?.ok_or(StoreError::TicketNotFound(ticket_id))?;
        tx.commit().await?;
        debug!("🗃️ Ticket {ticket_id} paid (ref {payment_ref})");
        Ok(ticket)
    }

    async fn fetch_candidate_orders(&self, release_id: i64) -> Result<Vec<TicketOrder>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_candidates(release_id, &mut conn).await
    }

    async fn insert_tickets_and_handle(
        &self,
        release_id: i64,
        new_tickets: &[NewTicket],
        rejections: &[Rejection],
        now: DateTime<Utc>,
    ) -> Result<AllocationOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !releases::try_mark_allocated(release_id, now, &mut tx).await? {
            // Distinguish a lost race from a bad id.
            return match releases::fetch_release(release_id, &mut tx).await? {
                Some(_) => Err(StoreError::AlreadyAllocated(release_id)),
                None => Err(StoreError::ReleaseNotFound(release_id)),
            };
        }
        let mut ids = Vec::with_capacity(new_tickets.len());
        for ticket in new_tickets {
            ids.push(tickets::insert_ticket(release_id, ticket, now, &mut tx).await?);
            orders::mark_handled(ticket.order_id, now, &mut tx).await?;
        }
        for rejection in rejections {
            orders::mark_rejected(rejection.order_id, &rejection.reason, now, &mut tx).await?;
        }
        let inserted = tickets::fetch_tickets(&ids, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Release {release_id} allocated: {} tickets inserted, {} orders rejected",
            inserted.len(),
            rejections.len()
        );
        Ok(AllocationOutcome { tickets: inserted, rejected_orders: rejections.len() })
    }

    async fn list_allocated_tickets(&self, release_id: i64) -> Result<Vec<Ticket>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        tickets::list_allocated(release_id, &mut conn).await
    }

    async fn list_reserve_tickets(&self, release_id: i64) -> Result<Vec<Ticket>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        tickets::list_reserves(release_id, &mut conn).await
    }

    async fn reclaim_and_promote(
        &self,
        release_id: i64,
        now: DateTime<Utc>,
        tk: &Timekeeper,
    ) -> Result<ReclaimOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let release = releases::fetch_release(release_id, &mut tx)
            .await?
            .ok_or(StoreError::ReleaseNotFound(release_id))?;
        let allocated = tickets::list_allocated(release_id, &mut tx).await?;
        let reserves = tickets::list_reserves(release_id, &mut tx).await?;
        let plan = reclaim::plan(&release, &allocated, &reserves, now, tk)?;
        if plan.is_empty() {
            return Ok(ReclaimOutcome::default());
        }
        for &ticket_id in &plan.expire {
            tickets::expire_ticket(ticket_id, EXPIRY_REASON_UNPAID, now, &mut tx).await?;
        }
        for promotion in &plan.promote {
            tickets::promote_ticket(promotion.ticket_id, promotion.new_deadline, now, &mut tx).await?;
        }
        for change in &plan.renumber {
            tickets::set_reserve_rank(change.ticket_id, change.new_rank, now, &mut tx).await?;
        }
        let expired = tickets::fetch_tickets(&plan.expire, &mut tx).await?;
        let promoted_ids: Vec<i64> = plan.promote.iter().map(|p| p.ticket_id).collect();
        let promoted = tickets::fetch_tickets(&promoted_ids, &mut tx).await?;
        tx.commit().await?;
        trace!(
            "🗃️ Reclaim pass on release {release_id}: {} expired, {} promoted, {} renumbered",
            expired.len(),
            promoted.len(),
            plan.renumber.len()
        );
        Ok(ReclaimOutcome { expired, promoted, rank_changes: plan.renumber })
    }

    async fn open_allocated_releases(&self, now: DateTime<Utc>, grace: Duration) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        releases::open_allocated_releases(now - grace, &mut conn).await
    }

    async fn closed_unallocated_releases(&self, now: DateTime<Utc>) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        releases::closed_unallocated_releases(now, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
