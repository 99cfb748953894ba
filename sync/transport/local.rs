use super::{Delivery, EndpointId, Subscription, Transport};
use crate::protocol::Message;
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 256;

/// In-process bus. Every `connect` call yields an independent endpoint, the
/// way every `BroadcastChannel` object is its own publisher.
#[derive(Clone, Debug)]
pub struct LocalBus {
    sender: broadcast::Sender<Delivery>,
    next_id: Arc<AtomicU64>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn connect(&self) -> LocalTransport {
        LocalTransport {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LocalTransport {
    id: EndpointId,
    sender: broadcast::Sender<Delivery>,
}

impl LocalTransport {
    pub fn id(&self) -> EndpointId {
        self.id
    }
}

impl Transport for LocalTransport {
    fn publish(&self, message: Message) {
        let delivery = Delivery {
            origin: self.id,
            message,
        };
        if self.sender.send(delivery).is_err() {
            debug!("No subscribers attached, message dropped");
        }
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.sender.subscribe(), Some(self.id))
    }
}
