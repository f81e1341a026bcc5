use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db::traits::{OrderStore, StoreError},
    db_types::{NewOrder, Ticket, TicketOrder},
};

/// Intake API: the operations the HTTP layer and the payment webhook adapter call. Validation
/// happens inside the store's transaction so concurrent submissions cannot slip past the
/// per-user limit.
pub struct OrderFlowApi<B> {
    db: B,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B) -> Self {
        Self { db }
    }
}

impl<B> OrderFlowApi<B>
where B: OrderStore
{
    /// Places a new order. Fails with a typed error when the release window is closed, the
    /// release is promo-gated against the caller, or the user's cumulative quantity for the
    /// event would exceed `max_per_user`.
    pub async fn submit_order(&self, order: NewOrder) -> Result<TicketOrder, StoreError> {
        self.submit_order_at(order, Utc::now()).await
    }

    /// As [`Self::submit_order`], with an explicit submission instant. Used by tests to place
    /// orders inside or outside an FCFS window deterministically.
    pub async fn submit_order_at(&self, order: NewOrder, now: DateTime<Utc>) -> Result<TicketOrder, StoreError> {
        let order = self.db.insert_order(order, now).await?;
        debug!("🎫️ Order {} accepted for release {}", order.id, order.release_id);
        Ok(order)
    }

    /// Cancels an order. Succeeds only while the order is unhandled and only for its owner.
    pub async fn cancel_order(&self, order_id: i64, actor_user_id: i64) -> Result<TicketOrder, StoreError> {
        let order = self.db.cancel_order(order_id, actor_user_id, Utc::now()).await?;
        debug!("🎫️ Order {order_id} cancelled");
        Ok(order)
    }

    /// Records a payment notification against a ticket. Idempotent per payment reference; a paid
    /// ticket is never expired by the reclaim loop afterwards.
    pub async fn mark_paid(&self, ticket_id: i64, payment_ref: &str) -> Result<Ticket, StoreError> {
        let ticket = self.db.mark_ticket_paid(ticket_id, payment_ref).await?;
        info!("🎫️ Ticket {ticket_id} marked paid (ref {payment_ref})");
        Ok(ticket)
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
