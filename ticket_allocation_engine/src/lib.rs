//! Ticket Allocation Engine
//!
//! The allocation engine converts the order queue of a ticket release into allocated tickets and
//! ranked reserves under the release's policy, and keeps reclaiming unpaid allocations and
//! promoting reserves until the release winds down. It is the core of the ticketing backend; the
//! HTTP layer, payment webhooks and email dispatch are collaborators that sit on top of it.
//!
//! The library is divided into three main sections:
//! 1. Storage ([`mod@db`]). Sqlite is the supported backend. You should never need to touch the
//!    database directly; use the engine API instead. The data types stored in the database are
//!    public and live in [`db_types`].
//! 2. The engine API ([`mod@tae_api`]): [`OrderFlowApi`] for order intake and payment
//!    notifications, [`AllocationApi`] for the allocation coordinator and the reclaim loop. Any
//!    backend implementing [`OrderStore`] can sit behind them.
//! 3. The pure core: [`policy`] (release methods), [`reclaim`] (expire/promote/renumber
//!    planning) and [`timekeeper`] (deadline arithmetic). These never touch I/O, which is what
//!    makes allocation decisions reproducible and testable.
//!
//! The engine also emits notification intents ([`events`]) when tickets change state — allocated,
//! reserve created, promoted, rank changed, expired. Delivery is fire-and-forget: hook an email
//! worker in via [`events::EventHooks`] and the engine never waits for it.

mod db;

pub mod db_types;
pub mod events;
pub mod helpers;
pub mod policy;
pub mod reclaim;
pub mod timekeeper;
mod tae_api;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use db::traits::{
    AllocationOutcome,
    NewTicket,
    OrderStore,
    ReclaimOutcome,
    Rejection,
    StoreError,
    Summary,
    TickSummary,
};
pub use tae_api::{AllocationApi, AllocationError, OrderFlowApi};
pub use timekeeper::Timekeeper;
