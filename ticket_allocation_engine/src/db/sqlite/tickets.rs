use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db::traits::{NewTicket, StoreError},
    db_types::Ticket,
};

const TICKET_COLUMNS: &str = "id, order_id, release_id, user_id, is_reserve, reserve_rank, paid, payment_ref, \
                              paid_deadline, qr, deleted, deleted_reason, created_at, updated_at";

pub async fn insert_ticket(
    release_id: i64,
    ticket: &NewTicket,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<i64, StoreError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tickets (
            order_id, release_id, user_id, is_reserve, reserve_rank, paid_deadline, qr,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING id;
        "#,
    )
    .bind(ticket.order_id)
    .bind(release_id)
    .bind(ticket.user_id)
    .bind(ticket.is_reserve())
    .bind(ticket.reserve_rank)
    .bind(ticket.paid_deadline)
    .bind(&ticket.qr)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(id)
}

pub async fn fetch_ticket(id: i64, conn: &mut SqliteConnection) -> Result<Option<Ticket>, StoreError> {
    let sql = format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1");
    let ticket = sqlx::query_as::<_, Ticket>(&sql).bind(id).fetch_optional(conn).await?;
    Ok(ticket)
}

pub async fn fetch_tickets(ids: &[i64], conn: &mut SqliteConnection) -> Result<Vec<Ticket>, StoreError> {
    let mut result = Vec::with_capacity(ids.len());
    for &id in ids {
        if let Some(ticket) = fetch_ticket(id, &mut *conn).await? {
            result.push(ticket);
        }
    }
    Ok(result)
}

/// Rank-0, non-deleted tickets of a release.
pub async fn list_allocated(release_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Ticket>, StoreError> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM tickets \
         WHERE release_id = $1 AND is_reserve = 0 AND deleted = 0 ORDER BY id"
    );
    let tickets = sqlx::query_as::<_, Ticket>(&sql).bind(release_id).fetch_all(conn).await?;
    Ok(tickets)
}

/// Non-deleted reserves of a release in promotion order.
pub async fn list_reserves(release_id: i64, conn: &mut SqliteConnection) -> Result<Vec<Ticket>, StoreError> {
    let sql = format!(
        "SELECT {TICKET_COLUMNS} FROM tickets \
         WHERE release_id = $1 AND is_reserve = 1 AND deleted = 0 ORDER BY reserve_rank ASC"
    );
    let tickets = sqlx::query_as::<_, Ticket>(&sql).bind(release_id).fetch_all(conn).await?;
    Ok(tickets)
}

/// Soft-deletes an unpaid ticket, freeing one capacity slot. The `paid = 0` guard makes a paid
/// ticket unexpirable even if the caller's view of the row was stale.
pub async fn expire_ticket(
    id: i64,
    reason: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE tickets SET deleted = 1, deleted_reason = $1, updated_at = $2 WHERE id = $3 AND paid = 0 AND deleted = 0",
    )
    .bind(reason)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        // The guard refused: say why.
        return match fetch_ticket(id, conn).await? {
            Some(t) if t.deleted => Err(StoreError::TicketDeleted(id)),
            Some(_) => Err(StoreError::TicketAlreadyPaid(id)),
            None => Err(StoreError::TicketNotFound(id)),
        };
    }
    Ok(())
}

/// Moves a reserve to rank 0 with a fresh payment deadline.
pub async fn promote_ticket(
    id: i64,
    new_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE tickets SET is_reserve = 0, reserve_rank = 0, paid_deadline = $1, updated_at = $2 WHERE id = $3",
    )
    .bind(new_deadline)
    .bind(now)
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_reserve_rank(
    id: i64,
    new_rank: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE tickets SET reserve_rank = $1, updated_at = $2 WHERE id = $3")
        .bind(new_rank)
        .bind(now)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn record_payment(
    id: i64,
    payment_ref: &str,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE tickets SET paid = 1, payment_ref = $1, updated_at = $2 WHERE id = $3")
        .bind(payment_ref)
        .bind(now)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use tas_common::Money;

    use super::*;
    use crate::{
        db::traits::OrderStore,
        db_types::{NewOrder, NewTicketRelease, ReleaseMethod},
        helpers::new_qr_code,
        test_utils::prepare_env::{prepare_test_env, random_db_path},
        SqliteDatabase,
    };

    async fn order_fixture(db: &SqliteDatabase) -> (i64, i64) {
        let opens_at = Utc::now() - Duration::hours(1);
        let release = db
            .create_release(NewTicketRelease::new(
                1,
                "Expiry guards",
                opens_at,
                opens_at + Duration::hours(6),
                5,
                ReleaseMethod::ReservedDirect,
                10,
            ))
            .await
            .unwrap();
        let tt = db.add_ticket_type(release.id, "General admission", Money::from_whole(10)).await.unwrap();
        let order = db.insert_order(NewOrder::new(1, release.id, tt.id, 1), Utc::now()).await.unwrap();
        (release.id, order.id)
    }

    async fn insert_unpaid(release_id: i64, order_id: i64, conn: &mut SqliteConnection) -> i64 {
        let new_ticket = NewTicket { order_id, user_id: 1, reserve_rank: 0, paid_deadline: None, qr: new_qr_code() };
        insert_ticket(release_id, &new_ticket, Utc::now(), conn).await.unwrap()
    }

    #[tokio::test]
    async fn expiry_guard_reports_why_nothing_was_expired() {
        let url = random_db_path();
        prepare_test_env(&url).await;
        let db = SqliteDatabase::new_with_url(&url, 2).await.unwrap();
        let (release_id, order_id) = order_fixture(&db).await;
        let mut conn = db.pool().acquire().await.unwrap();

        let paid = insert_unpaid(release_id, order_id, &mut conn).await;
        record_payment(paid, "pay-1", Utc::now(), &mut conn).await.unwrap();
        let err = expire_ticket(paid, "unpaid", Utc::now(), &mut conn).await.unwrap_err();
        assert!(matches!(err, StoreError::TicketAlreadyPaid(_)));

        let gone = insert_unpaid(release_id, order_id, &mut conn).await;
        expire_ticket(gone, "unpaid", Utc::now(), &mut conn).await.unwrap();
        let err = expire_ticket(gone, "unpaid", Utc::now(), &mut conn).await.unwrap_err();
        assert!(matches!(err, StoreError::TicketDeleted(_)));

        let err = expire_ticket(9999, "unpaid", Utc::now(), &mut conn).await.unwrap_err();
        assert!(matches!(err, StoreError::TicketNotFound(_)));
    }
}
