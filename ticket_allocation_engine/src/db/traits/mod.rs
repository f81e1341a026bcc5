//! # Storage contracts.
//!
//! This module defines the behaviour a database backend must expose to act as the order store for
//! the allocation engine.
//!
//! ## Order store
//! The [`OrderStore`] trait is the single storage contract: the release/order/ticket catalog, the
//! intake operations (submit, cancel, mark paid), and the two transactional composites consumed by
//! the coordinator and the reclaim loop. Fine-grained ticket operations (expire, promote,
//! renumber) live as per-connection helpers inside each backend so that a reclaim pass over one
//! release is one serializable transaction.
//!
//! All instants cross this boundary as UTC `DateTime`s; durations are integer seconds in storage.
mod data_objects;
mod errors;
mod order_store;

pub use data_objects::{AllocationOutcome, NewTicket, ReclaimOutcome, Rejection, Summary, TickSummary};
pub use errors::StoreError;
pub use order_store::OrderStore;
