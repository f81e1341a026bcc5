use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    ReserveCreatedEvent,
    ReservePromotedEvent,
    ReserveRankChangedEvent,
    TicketAllocatedEvent,
    TicketExpiredEvent,
};

/// The producer ends handed to the coordinator and the reclaim loop. Cloneable; publishing to an
/// empty producer list is a no-op.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub ticket_allocated_producer: Vec<EventProducer<TicketAllocatedEvent>>,
    pub reserve_created_producer: Vec<EventProducer<ReserveCreatedEvent>>,
    pub reserve_promoted_producer: Vec<EventProducer<ReservePromotedEvent>>,
    pub reserve_rank_changed_producer: Vec<EventProducer<ReserveRankChangedEvent>>,
    pub ticket_expired_producer: Vec<EventProducer<TicketExpiredEvent>>,
}

pub struct EventHandlers {
    pub on_ticket_allocated: Option<EventHandler<TicketAllocatedEvent>>,
    pub on_reserve_created: Option<EventHandler<ReserveCreatedEvent>>,
    pub on_reserve_promoted: Option<EventHandler<ReservePromotedEvent>>,
    pub on_reserve_rank_changed: Option<EventHandler<ReserveRankChangedEvent>>,
    pub on_ticket_expired: Option<EventHandler<TicketExpiredEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_ticket_allocated: hooks.on_ticket_allocated.map(|f| EventHandler::new(buffer_size, f)),
            on_reserve_created: hooks.on_reserve_created.map(|f| EventHandler::new(buffer_size, f)),
            on_reserve_promoted: hooks.on_reserve_promoted.map(|f| EventHandler::new(buffer_size, f)),
            on_reserve_rank_changed: hooks.on_reserve_rank_changed.map(|f| EventHandler::new(buffer_size, f)),
            on_ticket_expired: hooks.on_ticket_expired.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_ticket_allocated {
            result.ticket_allocated_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_reserve_created {
            result.reserve_created_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_reserve_promoted {
            result.reserve_promoted_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_reserve_rank_changed {
            result.reserve_rank_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_ticket_expired {
            result.ticket_expired_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_ticket_allocated {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_reserve_created {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_reserve_promoted {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_reserve_rank_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_ticket_expired {
            tokio::spawn(handler.start_handler());
        }
    }
}

/// Hook registration, one optional async closure per event kind.
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_ticket_allocated: Option<Handler<TicketAllocatedEvent>>,
    pub on_reserve_created: Option<Handler<ReserveCreatedEvent>>,
    pub on_reserve_promoted: Option<Handler<ReservePromotedEvent>>,
    pub on_reserve_rank_changed: Option<Handler<ReserveRankChangedEvent>>,
    pub on_ticket_expired: Option<Handler<TicketExpiredEvent>>,
}

impl EventHooks {
    pub fn on_ticket_allocated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TicketAllocatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_ticket_allocated = Some(Arc::new(f));
        self
    }

    pub fn on_reserve_created<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReserveCreatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_reserve_created = Some(Arc::new(f));
        self
    }

    pub fn on_reserve_promoted<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReservePromotedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_reserve_promoted = Some(Arc::new(f));
        self
    }

    pub fn on_reserve_rank_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ReserveRankChangedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_reserve_rank_changed = Some(Arc::new(f));
        self
    }

    pub fn on_ticket_expired<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(TicketExpiredEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_ticket_expired = Some(Arc::new(f));
        self
    }
}
