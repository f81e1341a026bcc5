//! The engine's public API. [`OrderFlowApi`] carries the intake operations (submit, cancel, mark
//! paid); [`AllocationApi`] carries the allocation coordinator and the reclaim/promotion tick.
//! Backends plug in through the [`crate::db::traits::OrderStore`] trait.

pub mod allocation_api;
pub mod errors;
pub mod order_flow_api;

pub use allocation_api::AllocationApi;
pub use errors::AllocationError;
pub use order_flow_api::OrderFlowApi;
