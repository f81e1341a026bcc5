use thiserror::Error;

use crate::reclaim::InvariantViolation;

/// Error kinds surfaced by the storage layer. Callers are expected to match on these: the
/// coordinator turns `AlreadyAllocated` into a clean no-op, the reclaim loop treats `Database` as
/// transient (skip the release, retry next tick) and `InvariantViolation` as fatal for the
/// affected release.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Release {0} does not exist")]
    ReleaseNotFound(i64),
    #[error("Order {0} does not exist")]
    OrderNotFound(i64),
    #[error("Ticket {0} does not exist")]
    TicketNotFound(i64),
    #[error("Ticket type {0} does not exist in release {1}")]
    TicketTypeNotFound(i64, i64),
    #[error("Release {0} has already been allocated")]
    AlreadyAllocated(i64),
    #[error("Order quantity {0} is not a positive number of tickets")]
    InvalidQuantity(i64),
    #[error("User {user_id} would hold {requested} tickets for event {event_id}, over the limit of {max_per_user}")]
    OrderLimitExceeded {
        user_id: i64,
        event_id: i64,
        requested: i64,
        max_per_user: i64,
    },
    #[error("Release {0} is not open for orders")]
    WindowClosed(i64),
    #[error("Release {0} requires a valid promo code")]
    GatedRelease(i64),
    #[error("Order {0} has already been handled and cannot be cancelled")]
    OrderAlreadyHandled(i64),
    #[error("Order {0} does not belong to user {1}")]
    NotOrderOwner(i64, i64),
    #[error("Ticket {0} has already been paid")]
    TicketAlreadyPaid(i64),
    #[error("Ticket {0} is a reserve and cannot be paid before promotion")]
    ReserveNotPayable(i64),
    #[error("Ticket {0} has been deleted")]
    TicketDeleted(i64),
    #[error(transparent)]
    InvariantViolation(#[from] InvariantViolation),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Corrupt stored value: {0}")]
    CorruptValue(String),
}

impl StoreError {
    /// Transient errors may be retried with backoff; everything else is a terminal answer for the
    /// request that caused it.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_))
    }
}
