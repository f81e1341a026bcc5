use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, SqliteConnection};

use crate::{
    db::traits::StoreError,
    db_types::{NewTicketRelease, PaymentDeadline, ReleaseMethod, TicketRelease, TicketType},
};

/// Flat row shape for a release joined with its payment deadline; reassembled into the richer
/// [`TicketRelease`] on the way out.
#[derive(Debug, FromRow)]
struct ReleaseRow {
    id: i64,
    event_id: i64,
    name: String,
    opens_at: DateTime<Utc>,
    closes_at: DateTime<Utc>,
    capacity: i64,
    method: String,
    open_window_secs: Option<i64>,
    max_per_user: i64,
    allocated: bool,
    reserved: bool,
    is_private: bool,
    promo_code_digest: Option<String>,
    lottery_nonce: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    absolute_deadline: Option<DateTime<Utc>>,
    reserve_payment_secs: Option<i64>,
}

impl TryFrom<ReleaseRow> for TicketRelease {
    type Error = StoreError;

    fn try_from(row: ReleaseRow) -> Result<Self, Self::Error> {
        let method = ReleaseMethod::from_parts(&row.method, row.open_window_secs)
            .map_err(|e| StoreError::CorruptValue(e.0))?;
        let payment_deadline = row.absolute_deadline.map(|absolute_deadline| PaymentDeadline {
            absolute_deadline,
            reserve_payment_duration: row.reserve_payment_secs.map(Duration::seconds),
        });
        Ok(TicketRelease {
            id: row.id,
            event_id: row.event_id,
            name: row.name,
            opens_at: row.opens_at,
            closes_at: row.closes_at,
            capacity: row.capacity,
            method,
            max_per_user: row.max_per_user,
            allocated: row.allocated,
            reserved: row.reserved,
            is_private: row.is_private,
            promo_code_digest: row.promo_code_digest,
            lottery_nonce: row.lottery_nonce,
            payment_deadline,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const RELEASE_COLUMNS: &str = r#"
    r.id, r.event_id, r.name, r.opens_at, r.closes_at, r.capacity, r.method, r.open_window_secs,
    r.max_per_user, r.allocated, r.reserved, r.is_private, r.promo_code_digest, r.lottery_nonce,
    r.created_at, r.updated_at, d.absolute_deadline, d.reserve_payment_secs
"#;

pub async fn insert_release(
    release: NewTicketRelease,
    lottery_nonce: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<TicketRelease, StoreError> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO ticket_releases (
            event_id, name, opens_at, closes_at, capacity, method, open_window_secs,
            max_per_user, reserved, is_private, promo_code_digest, lottery_nonce,
            created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
        RETURNING id;
        "#,
    )
    .bind(release.event_id)
    .bind(&release.name)
    .bind(release.opens_at)
    .bind(release.closes_at)
    .bind(release.capacity)
    .bind(release.method.name())
    .bind(release.method.open_window_seconds())
    .bind(release.max_per_user)
    .bind(release.reserved)
    .bind(release.is_private)
    .bind(&release.promo_code_digest)
    .bind(lottery_nonce)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    if let Some(deadline) = &release.payment_deadline {
        sqlx::query(
            "INSERT INTO payment_deadlines (release_id, absolute_deadline, reserve_payment_secs) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(deadline.absolute_deadline)
        .bind(deadline.reserve_payment_duration.map(|d| d.num_seconds()))
        .execute(&mut *conn)
        .await?;
    }
    fetch_release(id, conn).await?.ok_or(StoreError::ReleaseNotFound(id))
}

pub async fn fetch_release(id: i64, conn: &mut SqliteConnection) -> Result<Option<TicketRelease>, StoreError> {
    let sql = format!(
        "SELECT {RELEASE_COLUMNS} FROM ticket_releases r \
         LEFT JOIN payment_deadlines d ON d.release_id = r.id WHERE r.id = $1"
    );
    let row = sqlx::query_as::<_, ReleaseRow>(&sql).bind(id).fetch_optional(conn).await?;
    row.map(TicketRelease::try_from).transpose()
}

/// Flips the one-way `allocated` latch. Returns false when the latch was already set, which is
/// how a losing coordinator learns it lost the race.
pub async fn try_mark_allocated(id: i64, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE ticket_releases SET allocated = 1, updated_at = $1 WHERE id = $2 AND allocated = 0")
        .bind(now)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn open_allocated_releases(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, StoreError> {
    let ids = sqlx::query_scalar("SELECT id FROM ticket_releases WHERE allocated = 1 AND closes_at >= $1 ORDER BY id")
        .bind(cutoff)
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

pub async fn closed_unallocated_releases(
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, StoreError> {
    let ids = sqlx::query_scalar("SELECT id FROM ticket_releases WHERE allocated = 0 AND closes_at <= $1 ORDER BY id")
        .bind(now)
        .fetch_all(conn)
        .await?;
    Ok(ids)
}

pub async fn insert_ticket_type(
    release_id: i64,
    name: &str,
    price: tas_common::Money,
    conn: &mut SqliteConnection,
) -> Result<TicketType, StoreError> {
    let id: i64 =
        sqlx::query_scalar("INSERT INTO ticket_types (release_id, name, price) VALUES ($1, $2, $3) RETURNING id")
            .bind(release_id)
            .bind(name)
            .bind(price)
            .fetch_one(&mut *conn)
            .await?;
    fetch_ticket_type(id, conn).await?.ok_or(StoreError::TicketTypeNotFound(id, release_id))
}

pub async fn fetch_ticket_type(id: i64, conn: &mut SqliteConnection) -> Result<Option<TicketType>, StoreError> {
    let row = sqlx::query_as::<_, TicketType>("SELECT id, release_id, name, price FROM ticket_types WHERE id = $1")
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(row)
}
