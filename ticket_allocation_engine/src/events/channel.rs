//! Single-type async event channel.
//!
//! Each event kind gets its own [`EventHandler`] with a bounded mpsc queue. Producers are cheap
//! clones of the sender; the handler end drains the queue and runs the registered hook on a
//! spawned task per event, so a slow email template never blocks the coordinator or the reclaim
//! loop.

use std::{
    future::Future,
    pin::Pin,
    sync::{atomic::AtomicI64, Arc},
};

use log::*;
use tokio::sync::mpsc;

pub type Handler<E> = Arc<dyn Fn(E) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

pub struct EventHandler<E: Send + Sync + 'static> {
    listener: mpsc::Receiver<E>,
    sender: mpsc::Sender<E>,
    handler: Handler<E>,
}

impl<E: Send + Sync + 'static> EventHandler<E> {
    pub fn new(buffer_size: usize, handler: Handler<E>) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        Self { listener: receiver, sender, handler }
    }

    pub fn subscribe(&self) -> EventProducer<E> {
        EventProducer::new(self.sender.clone())
    }

    /// Drains the queue until every producer has been dropped, then waits for in-flight hook
    /// invocations to finish.
    pub async fn start_handler(mut self) {
        debug!("📣️ Starting notification handler");
        // Dropping the internal sender lets the receive loop end once the last producer goes away.
        drop(self.sender);
        let in_flight = Arc::new(AtomicI64::new(0));
        while let Some(event) = self.listener.recv().await {
            let handler = Arc::clone(&self.handler);
            in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let counter = in_flight.clone();
            tokio::spawn(async move {
                (handler)(event).await;
                counter.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            });
        }
        while in_flight.load(std::sync::atomic::Ordering::SeqCst) > 0 {
            trace!("📣️ Waiting for notification hooks to complete");
            tokio::time::sleep(tokio::time::Duration::from_millis(250)).await;
        }
        debug!("📣️ Notification handler has shut down");
    }
}

#[derive(Clone)]
pub struct EventProducer<E: Send + Sync> {
    sender: mpsc::Sender<E>,
}

impl<E: Send + Sync> EventProducer<E> {
    pub fn new(sender: mpsc::Sender<E>) -> Self {
        Self { sender }
    }

    /// Fire-and-forget. A full or closed queue is logged and swallowed; notification delivery is
    /// not part of engine correctness.
    pub async fn publish_event(&self, event: E) {
        if let Err(e) = self.sender.send(event).await {
            error!("📣️ Failed to publish notification intent: {e}");
        }
    }
}
