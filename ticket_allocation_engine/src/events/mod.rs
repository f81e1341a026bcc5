//! Fire-and-forget notification intents.
//!
//! The allocation coordinator and the reclaim loop emit an intent whenever a ticket changes state:
//! allocated, reserve created, reserve promoted, reserve rank changed, ticket expired. Delivery is
//! asynchronous and happens strictly after the owning database transaction has committed; a failed
//! or missing subscriber is logged and never affects engine correctness. Downstream consumers
//! (the email worker, mostly) hook in through [`EventHooks`].

mod channel;
mod event_types;
mod hooks;

pub use channel::{EventHandler, EventProducer, Handler};
pub use event_types::*;
pub use hooks::{EventHandlers, EventHooks, EventProducers};
