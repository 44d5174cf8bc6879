use std::sync::Arc;

use crate::broker::message::DeliveryId;
use crate::broker::topic::TopicQueue;

/// Settles one delivery on the queue it came from.
///
/// Acking or rejecting a delivery that is no longer in flight does nothing,
/// so duplicate or late calls are harmless.
#[derive(Debug, Clone)]
pub struct MessageManager {
    queue: Arc<TopicQueue>,
    delivery_id: DeliveryId,
}

impl MessageManager {
    pub(crate) fn new(queue: Arc<TopicQueue>, delivery_id: DeliveryId) -> Self {
        Self { queue, delivery_id }
    }

    /// Remove the message for good. Returns `false` if it was already settled.
    pub fn ack(&self) -> bool {
        self.queue.mark_as_processed(self.delivery_id)
    }

    /// Requeue the message at the head of its topic. Returns `false` if it
    /// was already settled.
    pub fn reject(&self) -> bool {
        self.queue.move_back_from_reserved(self.delivery_id)
    }

    pub fn delivery_id(&self) -> DeliveryId {
        self.delivery_id
    }

    pub fn topic(&self) -> &str {
        self.queue.name()
    }
}
