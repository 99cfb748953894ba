//! Publish/subscribe substrate shared by every participant of a session.
//!
//! Delivery is at-most-once to subscribers attached at publish time, FIFO per
//! publishing endpoint, unordered across endpoints. An endpoint never hears
//! its own messages.

pub mod dbus;
pub mod local;

use crate::protocol::Message;
use log::warn;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub use dbus::DbusTransport;
pub use local::{LocalBus, LocalTransport};

pub type EndpointId = u64;

#[derive(Clone, Debug)]
pub struct Delivery {
    pub origin: EndpointId,
    pub message: Message,
}

pub trait Transport: Send + Sync {
    /// Fire-and-forget. Must return without waiting on any peer.
    fn publish(&self, message: Message);

    /// Starts receiving messages published from now on. Dropping the returned
    /// `Subscription` unsubscribes.
    fn subscribe(&self) -> Subscription;
}

pub struct Subscription {
    receiver: broadcast::Receiver<Delivery>,
    local: Option<EndpointId>,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<Delivery>, local: Option<EndpointId>) -> Self {
        Self { receiver, local }
    }

    /// Next message from another endpoint, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            match self.receiver.recv().await {
                Ok(delivery) if Some(delivery.origin) == self.local => {}
                Ok(delivery) => return Some(delivery.message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber fell behind, {} messages dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
