use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::traits::StoreError,
    db_types::{NewOrder, TicketOrder, TicketRelease},
    helpers::promo_code_matches,
};

const ORDER_COLUMNS: &str = "id, user_id, release_id, ticket_type_id, quantity, created_at, handled_at, \
                             rejection_reason, deleted, deleted_reason";

/// Validates and inserts a new order. Must run inside the same transaction as the release load so
/// the per-user quantity check cannot race a concurrent submit.
pub async fn insert_new_order(
    release: &TicketRelease,
    order: NewOrder,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TicketOrder, StoreError> {
    if order.quantity <= 0 {
        return Err(StoreError::InvalidQuantity(order.quantity));
    }
    if !release.is_open_at(now) {
        return Err(StoreError::WindowClosed(release.id));
    }
    if release.reserved {
        let unlocked = match (&order.promo_code, &release.promo_code_digest) {
            (Some(code), Some(digest)) => promo_code_matches(code, digest),
            _ => false,
        };
        if !unlocked {
            return Err(StoreError::GatedRelease(release.id));
        }
    }
    let ticket_type = super::releases::fetch_ticket_type(order.ticket_type_id, &mut *conn)
        .await?
        .filter(|t| t.release_id == release.id)
        .ok_or(StoreError::TicketTypeNotFound(order.ticket_type_id, release.id))?;
    trace!("🎫️ Order for {} x '{}' passed static validation", order.quantity, ticket_type.name);

    let existing = user_event_quantity(order.user_id, release.event_id, &mut *conn).await?;
    let requested = existing + order.quantity;
    if order.quantity > release.max_per_user || requested > release.max_per_user {
        return Err(StoreError::OrderLimitExceeded {
            user_id: order.user_id,
            event_id: release.event_id,
            requested,
            max_per_user: release.max_per_user,
        });
    }

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO ticket_orders (user_id, release_id, ticket_type_id, quantity, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id;
        "#,
    )
    .bind(order.user_id)
    .bind(order.release_id)
    .bind(order.ticket_type_id)
    .bind(order.quantity)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    fetch_order(id, conn).await?.ok_or(StoreError::OrderNotFound(id))
}

/// Sum of quantities over the user's non-deleted orders across every release of the event.
pub async fn user_event_quantity(
    user_id: i64,
    event_id: i64,
    conn: &mut SqliteConnection,
) -> Result<i64, StoreError> {
    let total: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(o.quantity), 0)
        FROM ticket_orders o
        JOIN ticket_releases r ON o.release_id = r.id
        WHERE o.user_id = $1 AND r.event_id = $2 AND o.deleted = 0;
        "#,
    )
    .bind(user_id)
    .bind(event_id)
    .fetch_one(conn)
    .await?;
    Ok(total)
}

pub async fn fetch_order(id: i64, conn: &mut SqliteConnection) -> Result<Option<TicketOrder>, StoreError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM ticket_orders WHERE id = $1");
    let order = sqlx::query_as::<_, TicketOrder>(&sql).bind(id).fetch_optional(conn).await?;
    Ok(order)
}

/// The allocation queue: non-deleted, non-handled orders in arrival order, ties broken by id.
pub async fn fetch_candidates(release_id: i64, conn: &mut SqliteConnection) -> Result<Vec<TicketOrder>, StoreError> {
    let sql = format!(
        "SELECT {ORDER_COLUMNS} FROM ticket_orders \
         WHERE release_id = $1 AND deleted = 0 AND handled_at IS NULL \
         ORDER BY created_at ASC, id ASC"
    );
    let orders = sqlx::query_as::<_, TicketOrder>(&sql).bind(release_id).fetch_all(conn).await?;
    Ok(orders)
}

pub async fn mark_handled(order_id: i64, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query("UPDATE ticket_orders SET handled_at = $1 WHERE id = $2 AND handled_at IS NULL")
        .bind(now)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn mark_rejected(
    order_id: i64,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE ticket_orders SET handled_at = $1, rejection_reason = $2 WHERE id = $3 AND handled_at IS NULL")
        .bind(now)
        .bind(reason)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn soft_delete(
    order_id: i64,
    reason: &str,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE ticket_orders SET deleted = 1, deleted_reason = $1 WHERE id = $2")
        .bind(reason)
        .bind(order_id)
        .execute(conn)
        .await?;
    Ok(())
}
